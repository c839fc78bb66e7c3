//! Incremental parser for `text/event-stream` bodies.

use log::warn;

/// A dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Buffers raw bytes until a blank line completes an event.
///
/// Blocks are decoded only once complete, so a character split across chunks survives.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    /// Feeds a body chunk, returning every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        strip_crlf(&mut self.buf);

        let mut events = Vec::new();
        while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            match String::from_utf8(block) {
                Ok(block) => events.extend(parse_block(&block)),
                Err(e) => warn!("dropping event that is not valid utf-8: {e}"),
            }
        }

        events
    }
}

/// Turns `\r\n` into `\n`; a trailing `\r` waits for the next chunk.
fn strip_crlf(buf: &mut Vec<u8>) {
    if !buf.contains(&b'\r') {
        return;
    }

    let mut out = Vec::with_capacity(buf.len());
    for (i, &b) in buf.iter().enumerate() {
        if b == b'\r' && buf.get(i + 1) == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    *buf = out;
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = value.to_string(),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() && event == "message" {
        return None;
    }

    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}
