//! Response formatter - fits replies into the chat platform's message limits

use std::path::PathBuf;

use tracing::debug;

use crate::adapters::ChatTransport;
use crate::agent::OutgoingMessage;
use crate::Result;

/// Maximum characters per chat message.
pub const MESSAGE_LIMIT: usize = 2000;

/// Maximum attachments per chat message.
pub const ATTACHMENT_LIMIT: usize = 10;

fn is_boundary(c: char) -> bool {
    matches!(c, '.' | ':' | '!' | '?')
}

/// Split `text` into pieces of at most `limit` characters.
///
/// Each cut lands just after the last sentence boundary inside the window,
/// or exactly at `limit` characters when there is none. Pieces are trimmed.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let window_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];
        let cut = window.rfind(is_boundary).map(|i| i + 1).unwrap_or(window_end);

        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        rest = rest[cut..].trim();
    }

    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Lay out text chunks and attachments as outbound messages.
///
/// Attachments ride on the last text chunk, up to [`ATTACHMENT_LIMIT`]; the
/// rest follow in text-less batches. Only the first message may be a reply.
pub fn plan_delivery(
    chunks: Vec<String>,
    attachments: Vec<PathBuf>,
    reply_first: bool,
) -> Vec<OutgoingMessage> {
    let mut batches = attachments.chunks(ATTACHMENT_LIMIT).map(<[PathBuf]>::to_vec);
    let last = chunks.len().saturating_sub(1);
    let mut plan = Vec::with_capacity(chunks.len() + 1);

    for (i, chunk) in chunks.into_iter().enumerate() {
        let files = if i == last { batches.next().unwrap_or_default() } else { vec![] };
        if chunk.is_empty() && files.is_empty() {
            continue;
        }
        plan.push(OutgoingMessage {
            content: (!chunk.is_empty()).then_some(chunk),
            reply: false,
            attachments: files,
        });
    }

    for files in batches {
        plan.push(OutgoingMessage {
            content: None,
            reply: false,
            attachments: files,
        });
    }

    if reply_first {
        if let Some(first) = plan.first_mut() {
            first.reply = true;
        }
    }
    plan
}

/// Split, lay out and send a reply through `transport`.
///
/// The first message is threaded as a reply when something else has been
/// posted since the triggering message.
pub async fn send_response<T: ChatTransport + ?Sized>(
    transport: &T,
    text: &str,
    attachments: Vec<PathBuf>,
) -> Result<()> {
    let reply_first = !transport.is_latest().await?;
    let plan = plan_delivery(split_message(text, MESSAGE_LIMIT), attachments, reply_first);

    debug!("Delivering response in {} message(s)", plan.len());
    for message in plan {
        transport.send(message).await?;
    }
    Ok(())
}
