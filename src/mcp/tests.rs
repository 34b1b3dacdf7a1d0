//! Protocol handling and tool definition tests. Tool execution against real
//! services lives in the integration tests.

mod tool_definition_tests {
    use crate::mcp::tools::{AskHandler, FindSimilarHandler, ListDocumentsHandler, SearchDocumentsHandler};

    #[test]
    fn search_documents_definition() {
        let tool = SearchDocumentsHandler::tool_definition();
        assert_eq!(tool.name, "search_documents");

        let schema = tool.input_schema;
        let properties = schema["properties"].as_object().expect("has properties");
        for key in ["query", "limit", "search_type", "file_type", "date_from", "date_to"] {
            assert!(properties.contains_key(key), "missing {}", key);
        }
        assert_eq!(schema["required"], serde_json::json!(["query"]));
        assert_eq!(
            schema["properties"]["search_type"]["enum"],
            serde_json::json!(["text", "semantic", "hybrid"])
        );
    }

    #[test]
    fn find_similar_definition() {
        let tool = FindSimilarHandler::tool_definition();
        assert_eq!(tool.name, "find_similar");
        assert_eq!(tool.input_schema["required"], serde_json::json!(["document_id"]));
        assert_eq!(tool.input_schema["properties"]["document_id"]["type"], "integer");
    }

    #[test]
    fn list_documents_definition() {
        let tool = ListDocumentsHandler::tool_definition();
        assert_eq!(tool.name, "list_documents");
        assert!(tool.input_schema.get("required").is_none());
        let properties = tool.input_schema["properties"].as_object().expect("has properties");
        assert_eq!(properties.len(), 3);
    }

    #[test]
    fn ask_definition() {
        let tool = AskHandler::tool_definition();
        assert_eq!(tool.name, "ask");
        assert_eq!(tool.input_schema["required"], serde_json::json!(["question"]));
        assert!(tool.input_schema["properties"]["session_id"].is_object());
    }
}

mod server_tests {
    use crate::mcp::protocol::*;
    use crate::mcp::server::{ConnectionState, McpServer, ToolHandler};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;

    /// Echoes its arguments back as JSON, or fails when asked to
    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn handle(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
            let args = Value::Object(params.arguments.unwrap_or_default());
            if args.get("fail").is_some() {
                anyhow::bail!("echo exploded");
            }
            Ok(CallToolResult::json(&args)?)
        }
    }

    fn echo_tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: Some("Echo".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn server() -> McpServer {
        let server = McpServer::new("knowledge-rag", "0.1.0");
        server.register_tool(echo_tool("zeta"), EchoHandler).await;
        server.register_tool(echo_tool("alpha"), EchoHandler).await;
        server
    }

    async fn request(server: &McpServer, body: Value) -> Value {
        let response = server
            .handle_line(&body.to_string())
            .await
            .expect("request gets a response");
        serde_json::to_value(response).expect("serialize response")
    }

    fn initialize(version: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": version,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0"}
            }
        })
    }

    #[tokio::test]
    async fn initialize_negotiates_supported_versions() {
        let server = server().await;
        assert_eq!(server.connection_state().await, ConnectionState::Uninitialized);

        for version in SUPPORTED_PROTOCOL_VERSIONS {
            let response = request(&server, initialize(version)).await;
            assert_eq!(response["result"]["protocolVersion"], version);
            assert_eq!(response["result"]["serverInfo"]["name"], "knowledge-rag");
            assert_eq!(response["result"]["capabilities"]["tools"]["listChanged"], false);
        }
        assert_eq!(server.connection_state().await, ConnectionState::Initializing);

        let ack = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        assert!(server.handle_line(&ack.to_string()).await.is_none());
        assert_eq!(server.connection_state().await, ConnectionState::Ready);
    }

    #[tokio::test]
    async fn initialize_rejects_unknown_version() {
        let server = server().await;
        let response = request(&server, initialize("2023-01-01")).await;
        assert_eq!(response["error"]["code"], mcp_error_codes::INVALID_PROTOCOL_VERSION);
        assert_eq!(response["id"], 1);
    }

    #[tokio::test]
    async fn tools_are_listed_by_name() {
        let server = server().await;
        let response = request(
            &server,
            json!({"jsonrpc": "2.0", "id": "list", "method": "tools/list"}),
        )
        .await;

        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert_eq!(response["id"], "list");
    }

    #[tokio::test]
    async fn tool_call_returns_text_content() {
        let server = server().await;
        let response = request(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "alpha", "arguments": {"x": 1}}
            }),
        )
        .await;

        let result = &response["result"];
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["type"], "text");
        let text = result["content"][0]["text"].as_str().expect("text");
        assert_eq!(serde_json::from_str::<Value>(text).expect("json"), json!({"x": 1}));
    }

    #[tokio::test]
    async fn protocol_errors() {
        let server = server().await;

        let unknown_tool = request(
            &server,
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {"name": "nope"}}),
        )
        .await;
        assert_eq!(unknown_tool["error"]["code"], mcp_error_codes::TOOL_NOT_FOUND);

        let failing = request(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {"name": "alpha", "arguments": {"fail": true}}
            }),
        )
        .await;
        assert_eq!(failing["error"]["code"], error_codes::INTERNAL_ERROR);

        let missing_params = request(
            &server,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call"}),
        )
        .await;
        assert_eq!(missing_params["error"]["code"], error_codes::INVALID_PARAMS);

        let unknown_method = request(
            &server,
            json!({"jsonrpc": "2.0", "id": 6, "method": "resources/list"}),
        )
        .await;
        assert_eq!(unknown_method["error"]["code"], error_codes::METHOD_NOT_FOUND);

        let wrong_version = request(&server, json!({"jsonrpc": "1.0", "id": 7, "method": "ping"})).await;
        assert_eq!(wrong_version["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(wrong_version["id"], 7);

        let garbage = server.handle_line("{not json").await.expect("parse error response");
        let garbage = serde_json::to_value(garbage).expect("serialize");
        assert_eq!(garbage["error"]["code"], error_codes::PARSE_ERROR);
        assert!(garbage["id"].is_null());
    }

    #[tokio::test]
    async fn ping_and_blank_lines() {
        let server = server().await;
        let pong = request(&server, json!({"jsonrpc": "2.0", "id": 8, "method": "ping"})).await;
        assert_eq!(pong["result"], json!({}));
        assert!(server.handle_line("   \n").await.is_none());
    }

    #[tokio::test]
    async fn serve_answers_each_line_and_closes() {
        let server = Arc::new(server().await);
        let input = format!(
            "{}\n{}\n{}\n",
            initialize(MCP_VERSION),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"})
        );
        let mut output = Vec::new();

        Arc::clone(&server)
            .serve(input.as_bytes(), &mut output)
            .await
            .expect("serve");

        let lines: Vec<Value> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 9);
        assert_eq!(server.connection_state().await, ConnectionState::Closed);
    }
}
