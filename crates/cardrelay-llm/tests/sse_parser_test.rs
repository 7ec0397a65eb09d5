use cardrelay_llm::{parse_sse_stream, BackendError, DifyLineParser, StreamEvent};
use futures::{stream, StreamExt};

fn chunks(parts: &[&str]) -> Vec<Result<Vec<u8>, std::io::Error>> {
    parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect()
}

async fn collect(parts: &[&str]) -> Vec<Result<StreamEvent, BackendError>> {
    let events = parse_sse_stream(stream::iter(chunks(parts)), DifyLineParser);
    events.collect().await
}

#[tokio::test]
async fn test_parses_agent_messages_in_order() {
    let results = collect(&[
        "data: {\"event\":\"agent_message\",\"conversation_id\":\"c1\",\"answer\":\"Hel\"}\n\n",
        "data: {\"event\":\"agent_message\",\"conversation_id\":\"c1\",\"answer\":\"lo\"}\n\n",
        "data: {\"event\":\"message_end\",\"conversation_id\":\"c1\"}\n\n",
    ])
    .await;

    let events: Vec<StreamEvent> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].answer_delta(), Some("Hel"));
    assert_eq!(events[1].answer_delta(), Some("lo"));
    assert!(events[2].terminal);
    assert_eq!(events[2].conversation_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_line_split_across_chunks() {
    let results = collect(&[
        "data: {\"event\":\"agent_mes",
        "sage\",\"answer\":\"Hi\"}",
        "\n\n",
    ])
    .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap().answer_delta(), Some("Hi"));
}

#[tokio::test]
async fn test_skips_non_data_lines() {
    let results = collect(&[
        "event: ping\n\n",
        ": keep-alive\n",
        "data: {\"event\":\"ping\"}\n\n",
    ])
    .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap().event, "ping");
}

#[tokio::test]
async fn test_malformed_json_is_parse_error() {
    let results = collect(&[
        "data: {\"event\":\"agent_message\",\"answer\":\"ok\"}\n",
        "data: {broken\n",
    ])
    .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(BackendError::Parse { .. })));
}

#[tokio::test]
async fn test_trailing_line_without_newline() {
    let results = collect(&["data: {\"event\":\"message_end\"}"]).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].as_ref().unwrap().terminal);
}

#[tokio::test]
async fn test_transport_error_ends_stream() {
    let parts: Vec<Result<Vec<u8>, std::io::Error>> = vec![
        Ok(b"data: {\"event\":\"agent_message\",\"answer\":\"a\"}\n".to_vec()),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        Ok(b"data: {\"event\":\"agent_message\",\"answer\":\"b\"}\n".to_vec()),
    ];
    let results: Vec<_> = parse_sse_stream(stream::iter(parts), DifyLineParser)
        .collect()
        .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(BackendError::Stream(_))));
}
