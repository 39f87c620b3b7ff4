use omics_run_api::{
    ApiError, AwsConfig, CreateWorkflowRequest, Credentials, IamClient, IdentityService, ListQuery, OmicsClient, WORKFLOW_ENGINE,
    WorkflowService,
};
use omics_run_types::{EntityStatus, ParameterTemplate, ResourceKind};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> AwsConfig {
    let credentials = Credentials::new("AKIDEXAMPLE", "secret").with_session_token("session");
    AwsConfig::for_endpoint("us-west-2", credentials, Url::parse(&server.uri()).unwrap())
}

#[tokio::test]
async fn list_workflows_filters_by_name_and_signs_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workflow"))
        .and(query_param("name", "align"))
        .and(query_param("type", "PRIVATE"))
        .and(header_exists("authorization"))
        .and(header_exists("x-amz-date"))
        .and(header_exists("x-amz-security-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "1111111", "name": "align", "status": "ACTIVE"},
                {"id": "2222222", "name": "align", "status": "DELETED"}
            ],
            "nextToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OmicsClient::new(&config_for(&server)).unwrap();
    let page = client
        .list_entities(ListQuery {
            kind: ResourceKind::Workflow,
            name: "align",
            starting_token: None,
        })
        .await
        .unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, "1111111");
    assert_eq!(page.items[1].status, Some(EntityStatus::Deleted));
    assert_eq!(page.next_token.as_deref(), Some("page-2"));
}

#[tokio::test]
async fn missing_workflow_version_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workflow/1111111/version/0123456789abcdef"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("x-amzn-ErrorType", "ResourceNotFoundException")
                .set_body_json(json!({"message": "version not found"})),
        )
        .mount(&server)
        .await;

    let client = OmicsClient::new(&config_for(&server)).unwrap();
    let err = client.get_workflow_version("1111111", "0123456789abcdef").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound { .. }), "unexpected error: {err:?}");
}

#[tokio::test]
async fn access_denied_is_propagated_as_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workflow/1111111/version/0123456789abcdef"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-amzn-ErrorType", "AccessDeniedException")
                .set_body_json(json!({"message": "denied"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = OmicsClient::new(&config_for(&server)).unwrap();
    let err = client.get_workflow_version("1111111", "0123456789abcdef").await.unwrap_err();
    match err {
        ApiError::Service { status, code, .. } => {
            assert_eq!(status, 403);
            assert_eq!(code.as_deref(), Some("AccessDeniedException"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn create_workflow_posts_base64_definition() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/workflow"))
        .and(body_partial_json(json!({
            "name": "align",
            "engine": "WDL",
            "main": "align.wdl",
            "definitionZip": "UEsDBA==",
            "tags": {"CreatedBy": "omics-run"}
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "3333333", "status": "CREATING"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OmicsClient::new(&config_for(&server)).unwrap();
    let id = client
        .create_workflow(CreateWorkflowRequest {
            name: "align".into(),
            engine: WORKFLOW_ENGINE.into(),
            definition_zip: vec![0x50, 0x4b, 0x03, 0x04],
            main: "align.wdl".into(),
            parameter_template: ParameterTemplate::new(),
            tags: [("CreatedBy".to_string(), "omics-run".to_string())].into_iter().collect(),
            request_id: "req-1".into(),
        })
        .await
        .unwrap();
    assert_eq!(id, "3333333");
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runGroup"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "try later"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runGroup"))
        .and(query_param("name", "batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [{"id": "7654321", "name": "batch"}]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = OmicsClient::new(&config_for(&server)).unwrap();
    let page = client
        .list_entities(ListQuery {
            kind: ResourceKind::RunGroup,
            name: "batch",
            starting_token: None,
        })
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert!(page.next_token.is_none());
}

#[tokio::test]
async fn iam_role_lookup_parses_arn_and_classifies_missing_roles() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("Action", "GetRole"))
        .and(query_param("RoleName", "OmicsRole"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<GetRoleResponse><GetRoleResult><Role><Arn>arn:aws:iam::123456789012:role/OmicsRole</Arn></Role></GetRoleResult></GetRoleResponse>",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("RoleName", "Missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string(
            "<ErrorResponse><Error><Code>NoSuchEntity</Code><Message>The role with name Missing cannot be found.</Message></Error></ErrorResponse>",
        ))
        .mount(&server)
        .await;

    let client = IamClient::new(&config_for(&server)).unwrap();
    assert_eq!(
        client.get_role_arn("OmicsRole").await.unwrap(),
        "arn:aws:iam::123456789012:role/OmicsRole"
    );
    assert!(client.get_role_arn("Missing").await.unwrap_err().is_not_found());
}
