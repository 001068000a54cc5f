//! Outbound delivery of the rendered report.

pub mod webhook;

use crate::error::Error;

pub use webhook::WebhookNotifier;

/// Longest message body posted in one request, in characters.
pub const MESSAGE_LIMIT: usize = 1900;

pub trait Notifier {
    fn send(&self, message: &str) -> Result<(), Error>;
}

/// Send every chunk in order, stopping at the first failure.
pub fn deliver(notifier: &dyn Notifier, chunks: &[String]) -> Result<(), Error> {
    for chunk in chunks {
        notifier.send(chunk)?;
    }
    Ok(())
}

/// Split `text` into chunks of at most `limit` characters. Blank-line
/// separated blocks are kept together where possible, then single lines,
/// then the text is cut hard.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let text = text.trim();
    let limit = limit.max(1);
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for block in text.split("\n\n") {
        if char_len(block) <= limit {
            push_piece(&mut chunks, &mut current, block, "\n\n", limit);
            continue;
        }
        flush(&mut chunks, &mut current);
        for line in block.lines() {
            if char_len(line) <= limit {
                push_piece(&mut chunks, &mut current, line, "\n", limit);
            } else {
                flush(&mut chunks, &mut current);
                hard_split(line, limit, &mut chunks);
            }
        }
        flush(&mut chunks, &mut current);
    }
    flush(&mut chunks, &mut current);
    chunks
}

fn push_piece(
    chunks: &mut Vec<String>,
    current: &mut String,
    piece: &str,
    separator: &str,
    limit: usize,
) {
    let joined = char_len(current) + char_len(separator) + char_len(piece);
    if !current.is_empty() && joined > limit {
        flush(chunks, current);
    }
    if !current.is_empty() {
        current.push_str(separator);
    }
    current.push_str(piece);
}

fn hard_split(piece: &str, limit: usize, chunks: &mut Vec<String>) {
    let chars: Vec<char> = piece.chars().collect();
    for part in chars.chunks(limit) {
        chunks.push(part.iter().collect());
    }
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
