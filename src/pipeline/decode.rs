//! Streaming decoders (Bytes -> JSON Value)
//!
//! Both decoders buffer raw bytes and only convert complete frames to text, so
//! multi-byte characters split across network chunks survive intact.

use super::{ByteStream, Decoder, FrameStream};
use futures::{stream, StreamExt};
use serde_json::Value;

/// A minimal SSE decoder:
/// - splits by delimiter (default "\n\n")
/// - strips `prefix` (default "data: ")
/// - stops on `done_signal` (default "[DONE]")
pub struct SseDecoder {
    delimiter: String,
    prefix: String,
    done_signal: String,
}

impl SseDecoder {
    pub fn new(
        delimiter: Option<String>,
        prefix: Option<String>,
        done_signal: Option<String>,
    ) -> Self {
        Self {
            delimiter: delimiter.unwrap_or_else(|| "\n\n".to_string()),
            prefix: prefix.unwrap_or_else(|| "data: ".to_string()),
            done_signal: done_signal.unwrap_or_else(|| "[DONE]".to_string()),
        }
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

enum SseFrame {
    Payload(Value),
    Skip,
    Done,
}

fn parse_sse_frame(frame: &str, prefix: &str, done_signal: &str) -> SseFrame {
    let mut data = Vec::new();
    for line in frame.lines() {
        let line = line.trim();
        // Comments, `event:` and `id:` lines carry nothing we need.
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let payload = if let Some(rest) = line.strip_prefix(prefix) {
            rest
        } else if let Some(rest) = line.strip_prefix("data:") {
            rest.trim_start()
        } else if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
            continue;
        } else {
            line
        };
        data.push(payload);
    }

    let joined = data.join("\n");
    let joined = joined.trim();
    if joined == done_signal {
        return SseFrame::Done;
    }
    if joined.is_empty() {
        return SseFrame::Skip;
    }
    match serde_json::from_str(joined) {
        Ok(v) => SseFrame::Payload(v),
        Err(_) => SseFrame::Skip,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl Decoder for SseDecoder {
    fn decode_stream<E: Send + 'static>(&self, input: ByteStream<E>) -> FrameStream<E> {
        let delimiter = self.delimiter.clone().into_bytes();
        let prefix = self.prefix.clone();
        let done_signal = self.done_signal.clone();

        // Incrementally buffer bytes and emit full frames split by delimiter.
        let stream = stream::unfold(
            (input, Vec::<u8>::new(), false),
            move |(mut input, mut buf, finished)| {
                let delimiter = delimiter.clone();
                let prefix = prefix.clone();
                let done_signal = done_signal.clone();
                async move {
                    if finished {
                        return None;
                    }
                    loop {
                        if let Some(idx) = find(&buf, &delimiter) {
                            let frame = String::from_utf8_lossy(&buf[..idx]).into_owned();
                            buf.drain(..idx + delimiter.len());
                            match parse_sse_frame(&frame, &prefix, &done_signal) {
                                SseFrame::Payload(v) => return Some((Ok(v), (input, buf, false))),
                                SseFrame::Done => return None,
                                SseFrame::Skip => continue,
                            }
                        }

                        match input.next().await {
                            Some(Ok(bytes)) => {
                                buf.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
                            }
                            Some(Err(e)) => return Some((Err(e), (input, buf, true))),
                            None => {
                                // EOF: try the trailing frame once
                                let frame = String::from_utf8_lossy(&buf).into_owned();
                                return match parse_sse_frame(&frame, &prefix, &done_signal) {
                                    SseFrame::Payload(v) => Some((Ok(v), (input, Vec::new(), true))),
                                    _ => None,
                                };
                            }
                        }
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

/// Decoder for a streamed JSON array of objects (`[{...},\n{...}]`).
///
/// Top-level objects are cut out by brace depth, so it works whether the
/// server pretty-prints each element over many lines or writes one object per
/// line. Array brackets, separating commas and whitespace between objects are
/// ignored; an object that fails to parse is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonArrayDecoder;

#[derive(Default)]
struct ObjectScanner {
    buf: Vec<u8>,
    pos: usize,
    depth: usize,
    start: Option<usize>,
    in_string: bool,
    escaped: bool,
}

impl ObjectScanner {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete top-level object, if the buffer holds one.
    fn next_object(&mut self) -> Option<Vec<u8>> {
        while self.pos < self.buf.len() {
            let b = self.buf[self.pos];
            let i = self.pos;
            self.pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match b {
                b'"' if self.depth > 0 => self.in_string = true,
                b'{' => {
                    if self.depth == 0 {
                        self.start = Some(i);
                    }
                    self.depth += 1;
                }
                b'}' if self.depth > 0 => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        let start = self.start.take().unwrap_or(0);
                        let object = self.buf[start..=i].to_vec();
                        self.buf.drain(..=i);
                        self.pos = 0;
                        return Some(object);
                    }
                }
                _ => {}
            }
        }

        // Nothing open: whatever was scanned is separator noise.
        if self.depth == 0 {
            self.buf.clear();
            self.pos = 0;
        }
        None
    }
}

impl Decoder for JsonArrayDecoder {
    fn decode_stream<E: Send + 'static>(&self, input: ByteStream<E>) -> FrameStream<E> {
        let stream = stream::unfold(
            (input, ObjectScanner::default(), false),
            |(mut input, mut scanner, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    while let Some(object) = scanner.next_object() {
                        if let Ok(v) = serde_json::from_slice::<Value>(&object) {
                            return Some((Ok(v), (input, scanner, false)));
                        }
                    }

                    match input.next().await {
                        Some(Ok(bytes)) => scanner.push(&bytes),
                        Some(Err(e)) => return Some((Err(e), (input, scanner, true))),
                        None => return None,
                    }
                }
            },
        );

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;

    fn chunks(parts: &[&[u8]]) -> ByteStream<String> {
        let items: Vec<Result<Bytes, String>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    async fn collect(stream: FrameStream<String>) -> Vec<Result<Value, String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_sse_frames_across_chunks() {
        let input = chunks(&[
            b"data: {\"a\":1}\n\nda",
            b"ta: {\"a\":2}\n",
            b"\n: keep-alive\n\ndata: [DONE]\n\ndata: {\"a\":3}\n\n",
        ]);
        let frames = collect(SseDecoder::default().decode_stream(input)).await;
        let values: Vec<i64> = frames
            .into_iter()
            .map(|f| f.unwrap()["a"].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_sse_crlf_and_trailing_frame() {
        let input = chunks(&[b"data: {\"a\":1}\r\n\r\ndata: {\"a\":2}"]);
        let frames = collect(SseDecoder::default().decode_stream(input)).await;
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn test_sse_split_multibyte_character() {
        let text = "data: {\"t\":\"이야기\"}\n\n".as_bytes();
        // Split inside the first Hangul syllable.
        let input = chunks(&[&text[..13], &text[13..]]);
        let frames = collect(SseDecoder::default().decode_stream(input)).await;
        assert_eq!(frames[0].as_ref().unwrap()["t"], "이야기");
    }

    #[tokio::test]
    async fn test_sse_propagates_input_error() {
        let input: ByteStream<String> = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n\n")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"data: {\"a\":2}\n\n")),
        ]));
        let frames = collect(SseDecoder::default().decode_stream(input)).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_ref().unwrap_err(), "connection reset");
    }

    #[tokio::test]
    async fn test_json_array_pretty_printed() {
        let input = chunks(&[
            b"[{\n  \"text\": \"a {b}\"\n}\n",
            b",\r\n{\"text\": \"c\\\"}\"}",
            b"\n]",
        ]);
        let frames = collect(JsonArrayDecoder.decode_stream(input)).await;
        let texts: Vec<String> = frames
            .into_iter()
            .map(|f| f.unwrap()["text"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(texts, vec!["a {b}".to_string(), "c\"}".to_string()]);
    }

    #[tokio::test]
    async fn test_json_array_line_framing_skips_malformed() {
        let input = chunks(&[b"[\n{\"n\":1}\n,{\"n\":}\n,{\"n\":3}\n]\n"]);
        let frames = collect(JsonArrayDecoder.decode_stream(input)).await;
        let values: Vec<i64> = frames
            .into_iter()
            .map(|f| f.unwrap()["n"].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 3]);
    }
}
