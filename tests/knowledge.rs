mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use common::{Harness, OTHER_TOKEN, TOKEN};
use serde_json::{json, Value};

const BOUNDARY: &str = "relay-test-boundary";

fn multipart_upload(agent_id: Option<&str>, file: Option<(&str, &str)>) -> Request<Body> {
    let mut body = String::new();
    if let Some(agent_id) = agent_id {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"agent_id\"\r\n\r\n{agent_id}\r\n"
        ));
    }
    if let Some((name, contents)) = file {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
             Content-Type: text/plain\r\n\r\n{contents}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method("POST")
        .uri("/api/upload-doc")
        .header("authorization", format!("Bearer {TOKEN}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn kb_assets(body: &Value) -> Vec<Value> {
    body["agent"]["assets"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|asset| asset["fileType"] == "rag_kb")
        .cloned()
        .collect()
}

#[tokio::test]
async fn upload_provisions_links_and_uploads() {
    let h = Harness::new().await;
    let agent_id = h.create_agent("Acme Help").await;

    let (status, body) = h
        .send(multipart_upload(Some(&agent_id), Some(("faq.txt", "Q: hours? A: 9-5"))))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["ragId"], "rag-1");
    assert_eq!(body["fileName"], "faq.txt");
    assert!(body["ragName"].as_str().unwrap().starts_with("kb_Acme_Help_"));
    assert_eq!(body["uploadResponse"]["chunks"], 3);

    let calls = h.provider.calls();
    assert!(calls[1].starts_with("create_collection:kb_Acme_Help_"));
    assert_eq!(calls[2], "link_collection:lyzr-acme-help:rag-1");
    assert_eq!(calls[3], "upload_document:rag-1:faq.txt");

    let (_, detail) = h.get(&format!("/api/agents/{agent_id}"), Some(TOKEN)).await;
    let assets = detail["agent"]["assets"].as_array().unwrap();
    assert_eq!(assets.len(), 2);
    assert!(assets
        .iter()
        .any(|a| a["fileName"] == "faq.txt" && a["fileType"] == "text/plain"
            && a["assetId"].as_str().unwrap().starts_with("rag_file_")));
}

#[tokio::test]
async fn second_upload_reuses_the_collection() {
    let h = Harness::new().await;
    let agent_id = h.create_agent("Acme").await;

    h.send(multipart_upload(Some(&agent_id), Some(("a.txt", "one")))).await;
    let (status, _) = h
        .send(multipart_upload(Some(&agent_id), Some(("b.txt", "two"))))
        .await;
    assert_eq!(status, StatusCode::OK);

    let collections = h
        .provider
        .calls()
        .iter()
        .filter(|c| c.starts_with("create_collection:"))
        .count();
    assert_eq!(collections, 1);

    let (_, detail) = h.get(&format!("/api/agents/{agent_id}"), Some(TOKEN)).await;
    assert_eq!(kb_assets(&detail).len(), 1);
    assert_eq!(detail["agent"]["assets"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn link_failure_stops_before_upload() {
    let h = Harness::new().await;
    let agent_id = h.create_agent("Acme").await;
    *h.provider.fail_link.lock().unwrap() = true;

    let (status, body) = h
        .send(multipart_upload(Some(&agent_id), Some(("faq.txt", "text"))))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to upload to knowledge base" }));
    assert!(h
        .provider
        .calls()
        .iter()
        .all(|c| !c.starts_with("upload_document:")));

    let (_, detail) = h.get(&format!("/api/agents/{agent_id}"), Some(TOKEN)).await;
    assert_eq!(kb_assets(&detail).len(), 1);
    assert_eq!(detail["agent"]["assets"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn upload_requires_agent_and_file() {
    let h = Harness::new().await;
    let agent_id = h.create_agent("Acme").await;

    let (status, body) = h.send(multipart_upload(Some(&agent_id), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Agent ID and file are required");

    let (status, _) = h.send(multipart_upload(None, Some(("a.txt", "x")))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .send(multipart_upload(Some("unknown"), Some(("a.txt", "x"))))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(h.store.asset_count().await, 0);
}

#[tokio::test]
async fn knowledge_bases_are_created_listed_and_linked() {
    let h = Harness::new().await;
    let agent_id = h.create_agent("Acme").await;

    let (status, body) = h
        .json(
            "POST",
            "/api/knowledge-base",
            Some(TOKEN),
            json!({ "name": "Returns policy" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["knowledgeBase"]["id"], "rag-1");
    assert!(body["knowledgeBase"]["collectionName"]
        .as_str()
        .unwrap()
        .starts_with("kb_Returns_policy_"));

    let (_, listed) = h.get("/api/knowledge-base", Some(TOKEN)).await;
    assert_eq!(listed["knowledgeBases"].as_array().unwrap().len(), 1);
    let (_, others) = h.get("/api/knowledge-base", Some(OTHER_TOKEN)).await;
    assert!(others["knowledgeBases"].as_array().unwrap().is_empty());

    let (status, body) = h
        .json(
            "POST",
            "/api/knowledge-base/link",
            Some(TOKEN),
            json!({ "agentId": agent_id }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Agent ID and RAG ID are required");

    let (status, body) = h
        .json(
            "POST",
            "/api/knowledge-base/link",
            Some(TOKEN),
            json!({ "agentId": agent_id, "ragId": "rag-1", "ragName": "Returns policy" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(h
        .provider
        .calls()
        .contains(&"link_collection:lyzr-acme:rag-1".to_string()));

    let (_, detail) = h.get(&format!("/api/agents/{agent_id}"), Some(TOKEN)).await;
    assert_eq!(kb_assets(&detail).len(), 1);
}

#[tokio::test]
async fn linking_someone_elses_collection_is_not_found() {
    let h = Harness::new().await;
    let agent_id = h.create_agent("Acme").await;
    h.json(
        "POST",
        "/api/knowledge-base",
        Some(OTHER_TOKEN),
        json!({ "name": "Bob's docs" }),
    )
    .await;

    let (status, body) = h
        .json(
            "POST",
            "/api/knowledge-base/link",
            Some(TOKEN),
            json!({ "agentId": agent_id, "ragId": "rag-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Knowledge base not found");
}
