use eventsource_stream::Eventsource;
use futures_core::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio_util::bytes::Bytes;

use crate::error::AgentError;

/// `data` payloads of a server-sent event stream, one item per event.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, AgentError>> + Send>>;

pub fn parse_sse_frames<S, E>(byte_stream: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + 'static,
{
    let frames = byte_stream
        .map(|result| result.map_err(|e| std::io::Error::other(e.to_string())))
        .eventsource()
        .filter_map(|result| async move {
            match result {
                Ok(event) if event.data.is_empty() => None,
                Ok(event) => Some(Ok(event.data)),
                Err(e) => Some(Err(AgentError::execution_failed(e.to_string()))),
            }
        });

    Box::pin(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn yields_data_of_each_event() {
        let body = "data: {\"type\":\"a\"}\n\ndata: {\"type\":\"b\"}\n\n";
        let byte_stream = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(body)) });

        let frames: Vec<_> = parse_sse_frames(byte_stream).collect().await;

        assert_eq!(
            frames,
            vec![
                Ok("{\"type\":\"a\"}".to_string()),
                Ok("{\"type\":\"b\"}".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn reassembles_frames_split_across_chunks() {
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from("data: {\"type\":")),
            Ok(Bytes::from("\"llm_text_delta\"}\n")),
            Ok(Bytes::from("\n")),
        ];

        let frames: Vec<_> = parse_sse_frames(stream::iter(chunks)).collect().await;

        assert_eq!(frames, vec![Ok("{\"type\":\"llm_text_delta\"}".to_string())]);
    }

    #[tokio::test]
    async fn transport_errors_surface_as_execution_failures() {
        let chunks = vec![
            Ok(Bytes::from("data: first\n\n")),
            Err(std::io::Error::other("connection reset")),
        ];

        let frames: Vec<_> = parse_sse_frames(stream::iter(chunks)).collect().await;

        assert_eq!(frames[0], Ok("first".to_string()));
        assert!(matches!(frames[1], Err(AgentError::ExecutionFailed { .. })));
    }
}
