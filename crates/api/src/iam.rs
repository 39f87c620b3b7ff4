//! IAM query-API client, used only to turn role names into ARNs.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    ApiError, AwsConfig,
    service::IdentityService,
    transport::{SignedRequest, SignedTransport},
};

const SIGNING_SERVICE: &str = "iam";
const API_VERSION: &str = "2010-05-08";

static ROLE_ARN: Lazy<Regex> = Lazy::new(|| Regex::new(r"<Arn>\s*([^<\s]+)\s*</Arn>").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct IamClient {
    transport: SignedTransport,
}

impl IamClient {
    pub fn new(config: &AwsConfig) -> Result<Self, ApiError> {
        // IAM is a global service signed in its partition's home region.
        let signing_region = if config.region.starts_with("cn-") { "cn-north-1" } else { "us-east-1" };
        let transport = SignedTransport::new(config, config.iam_endpoint.clone(), signing_region.to_string(), SIGNING_SERVICE)?;
        Ok(Self { transport })
    }
}

#[async_trait]
impl IdentityService for IamClient {
    async fn get_role_arn(&self, role_name: &str) -> Result<String, ApiError> {
        let operation = "GetRole";
        let request = SignedRequest::get(operation, format!("IAM role {role_name}"), "/")
            .query("Action", "GetRole")
            .query("RoleName", role_name)
            .query("Version", API_VERSION);
        let body = self.transport.send(request).await?;
        parse_role_arn(&body).ok_or_else(|| ApiError::Service {
            operation,
            status: 200,
            code: None,
            message: "response did not contain a role ARN".into(),
        })
    }
}

fn parse_role_arn(body: &str) -> Option<String> {
    ROLE_ARN.captures(body).map(|caps| caps[1].to_string())
}
