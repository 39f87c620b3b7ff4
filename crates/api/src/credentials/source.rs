//! Choosing a credential provider from the environment and shared files.

use std::{fmt, future::Future, path::PathBuf, pin::Pin};

use chrono::Utc;
use url::Url;

use super::{Credentials, Environment, Profile, ProfileSet, ProviderContext, metadata, process, sso, sts};
use crate::{ApiError, config::validate_endpoint};

const CONTAINER_HOST: &str = "http://169.254.170.2";
const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";
/// Hosts a full container credentials URI may use over plain HTTP.
const CONTAINER_HTTP_HOSTS: &[&str] = &["127.0.0.1", "localhost", "169.254.170.2", "169.254.170.23", "[::1]", "[fd00:ec2::23]"];
/// Longest `source_profile` chain followed before giving up.
const MAX_CHAIN_DEPTH: usize = 8;

/// Role assumed with `sts:AssumeRole` using credentials from `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRole {
    pub role_arn: String,
    pub session_name: String,
    pub external_id: Option<String>,
    pub duration_seconds: Option<u32>,
    pub source: Box<CredentialSource>,
}

/// An IAM Identity Center account role, backed by a cached `aws sso login`
/// token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsoRole {
    /// `sso-session` name, or `None` for legacy profiles that inline the
    /// start URL.
    pub session_name: Option<String>,
    pub start_url: String,
    pub sso_region: String,
    pub account_id: String,
    pub role_name: String,
    pub cache_dir: PathBuf,
    pub portal_endpoint: Url,
}

/// Authorization sent to the container credentials endpoint.
#[derive(Clone, PartialEq, Eq)]
pub enum ContainerAuth {
    Token(String),
    /// Re-read on every load; EKS rotates the file.
    TokenFile(PathBuf),
}

impl fmt::Debug for ContainerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(<redacted>)"),
            Self::TokenFile(path) => f.debug_tuple("TokenFile").field(path).finish(),
        }
    }
}

/// Where credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Static(Credentials),
    AssumeRole(AssumeRole),
    WebIdentity {
        role_arn: String,
        token_file: PathBuf,
        session_name: String,
    },
    Sso(SsoRole),
    Process {
        command: String,
    },
    Container {
        uri: Url,
        auth: Option<ContainerAuth>,
    },
    InstanceMetadata {
        endpoint: Url,
    },
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("static credentials"),
            Self::AssumeRole(assume) => write!(f, "role {} assumed from {}", assume.role_arn, assume.source),
            Self::WebIdentity { role_arn, .. } => write!(f, "web identity role {role_arn}"),
            Self::Sso(role) => write!(f, "SSO role {} in account {}", role.role_name, role.account_id),
            Self::Process { .. } => f.write_str("credential_process"),
            Self::Container { uri, .. } => write!(f, "container credentials at {uri}"),
            Self::InstanceMetadata { endpoint } => write!(f, "instance metadata at {endpoint}"),
        }
    }
}

impl CredentialSource {
    /// Pick the first applicable provider of the default chain.
    pub fn discover(env: &Environment, profiles: &ProfileSet) -> Result<Self, ApiError> {
        if let Some(credentials) = env_credentials(env) {
            return Ok(Self::Static(credentials));
        }

        let (profile_name, explicit) = env.profile_name();
        match profiles.profile(profile_name) {
            Some(profile) => {
                if let Some(source) = profile_source(env, profiles, profile_name, profile, 0)? {
                    return Ok(source);
                }
            }
            None if explicit => {
                return Err(ApiError::Credentials(format!(
                    "profile '{profile_name}' (from AWS_PROFILE) not found in ~/.aws/credentials or ~/.aws/config"
                )));
            }
            None => {}
        }

        if let Some(source) = env_web_identity(env) {
            return Ok(source);
        }
        if let Some(source) = container_source(env)? {
            return Ok(source);
        }
        if env.var("AWS_EC2_METADATA_DISABLED").is_some_and(|value| value.eq_ignore_ascii_case("true")) {
            return Err(ApiError::Credentials(format!(
                "no credentials found in the environment, profile '{profile_name}' or container endpoint, and instance metadata is disabled"
            )));
        }
        Ok(Self::InstanceMetadata {
            endpoint: imds_endpoint(env)?,
        })
    }

    /// Fetch credentials from this source.
    ///
    /// Boxed because role assumption loads its own source recursively.
    pub fn load<'a>(&'a self, context: &'a ProviderContext) -> Pin<Box<dyn Future<Output = Result<Credentials, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Self::Static(credentials) => Ok(credentials.clone()),
                Self::AssumeRole(assume) => {
                    let source_credentials = assume.source.load(context).await?;
                    sts::assume_role(context, assume, source_credentials).await
                }
                Self::WebIdentity {
                    role_arn,
                    token_file,
                    session_name,
                } => sts::assume_role_with_web_identity(context, role_arn, token_file, session_name).await,
                Self::Sso(role) => sso::role_credentials(context, role).await,
                Self::Process { command } => process::run(command).await,
                Self::Container { uri, auth } => metadata::container(context, uri, auth.as_ref()).await,
                Self::InstanceMetadata { endpoint } => metadata::instance(context, endpoint).await,
            }
        })
    }
}

fn env_credentials(env: &Environment) -> Option<Credentials> {
    let access_key_id = env.var("AWS_ACCESS_KEY_ID")?;
    let secret_access_key = env.var("AWS_SECRET_ACCESS_KEY")?;
    let mut credentials = Credentials::new(access_key_id, secret_access_key);
    credentials.session_token = env.var("AWS_SESSION_TOKEN").map(str::to_string);
    Some(credentials)
}

fn static_credentials(profile: &Profile) -> Option<Credentials> {
    let mut credentials = Credentials::new(profile.get("aws_access_key_id")?, profile.get("aws_secret_access_key")?);
    credentials.session_token = profile.get("aws_session_token").map(str::to_string);
    Some(credentials)
}

/// Provider for one profile, in SDK precedence order. `depth` counts
/// `source_profile` hops.
fn profile_source(env: &Environment, profiles: &ProfileSet, name: &str, profile: &Profile, depth: usize) -> Result<Option<CredentialSource>, ApiError> {
    if let Some(role_arn) = profile.get("role_arn") {
        if let Some(source_name) = profile.get("source_profile") {
            if profile.has("mfa_serial") {
                return Err(ApiError::Credentials(format!(
                    "profile '{name}' requires an MFA token (mfa_serial), which cannot be prompted for"
                )));
            }
            let source = assume_role_source(env, profiles, name, source_name, depth)?;
            return Ok(Some(assume_role(env, role_arn, profile, source)?));
        }
        if let Some(credential_source) = profile.get("credential_source") {
            let source = named_credential_source(env, name, credential_source)?;
            return Ok(Some(assume_role(env, role_arn, profile, source)?));
        }
        if let Some(token_file) = profile.get("web_identity_token_file") {
            return Ok(Some(CredentialSource::WebIdentity {
                role_arn: role_arn.to_string(),
                token_file: PathBuf::from(token_file),
                session_name: session_name(env, profile),
            }));
        }
    }
    if profile.has("sso_session") || profile.has("sso_start_url") {
        return sso_source(env, profiles, name, profile).map(Some);
    }
    if let Some(credentials) = static_credentials(profile) {
        return Ok(Some(CredentialSource::Static(credentials)));
    }
    if let Some(command) = profile.get("credential_process") {
        return Ok(Some(CredentialSource::Process {
            command: command.to_string(),
        }));
    }
    Ok(None)
}

fn assume_role_source(env: &Environment, profiles: &ProfileSet, name: &str, source_name: &str, depth: usize) -> Result<CredentialSource, ApiError> {
    if depth >= MAX_CHAIN_DEPTH {
        return Err(ApiError::Credentials(format!(
            "source_profile chain starting at '{name}' is longer than {MAX_CHAIN_DEPTH} profiles or loops"
        )));
    }
    let source_profile = profiles.profile(source_name).ok_or_else(|| {
        ApiError::Credentials(format!("profile '{name}' names source_profile '{source_name}', which does not exist"))
    })?;
    // a profile may name itself to use its own static keys as the source
    if source_name == name {
        return static_credentials(source_profile).map(CredentialSource::Static).ok_or_else(|| {
            ApiError::Credentials(format!("profile '{name}' is its own source_profile but has no static keys"))
        });
    }
    profile_source(env, profiles, source_name, source_profile, depth + 1)?
        .ok_or_else(|| ApiError::Credentials(format!("source_profile '{source_name}' has no credentials")))
}

fn named_credential_source(env: &Environment, name: &str, credential_source: &str) -> Result<CredentialSource, ApiError> {
    let missing = || ApiError::Credentials(format!("profile '{name}' uses credential_source {credential_source}, which is not available"));
    match credential_source {
        "Environment" => env_credentials(env).map(CredentialSource::Static).ok_or_else(missing),
        "EcsContainer" => container_source(env)?.ok_or_else(missing),
        "Ec2InstanceMetadata" => Ok(CredentialSource::InstanceMetadata {
            endpoint: imds_endpoint(env)?,
        }),
        other => Err(ApiError::Credentials(format!(
            "profile '{name}' has unsupported credential_source '{other}'"
        ))),
    }
}

fn assume_role(env: &Environment, role_arn: &str, profile: &Profile, source: CredentialSource) -> Result<CredentialSource, ApiError> {
    let duration_seconds = profile
        .get("duration_seconds")
        .map(|raw| {
            raw.parse::<u32>()
                .map_err(|_| ApiError::Credentials(format!("duration_seconds '{raw}' is not a number")))
        })
        .transpose()?;
    Ok(CredentialSource::AssumeRole(AssumeRole {
        role_arn: role_arn.to_string(),
        session_name: session_name(env, profile),
        external_id: profile.get("external_id").map(str::to_string),
        duration_seconds,
        source: Box::new(source),
    }))
}

fn session_name(env: &Environment, profile: &Profile) -> String {
    profile
        .get("role_session_name")
        .or_else(|| env.var("AWS_ROLE_SESSION_NAME"))
        .map(str::to_string)
        .unwrap_or_else(|| format!("omics-run-{}", Utc::now().timestamp()))
}

fn env_web_identity(env: &Environment) -> Option<CredentialSource> {
    let token_file = env.var("AWS_WEB_IDENTITY_TOKEN_FILE")?;
    let role_arn = env.var("AWS_ROLE_ARN")?;
    Some(CredentialSource::WebIdentity {
        role_arn: role_arn.to_string(),
        token_file: PathBuf::from(token_file),
        session_name: env
            .var("AWS_ROLE_SESSION_NAME")
            .map(str::to_string)
            .unwrap_or_else(|| format!("omics-run-{}", Utc::now().timestamp())),
    })
}

fn sso_source(env: &Environment, profiles: &ProfileSet, name: &str, profile: &Profile) -> Result<CredentialSource, ApiError> {
    let require = |section: &Profile, key: &str, owner: &str| {
        section
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Credentials(format!("{owner} is missing {key}")))
    };
    let owner = format!("profile '{name}'");
    let (session_name, start_url, sso_region) = match profile.get("sso_session") {
        Some(session_name) => {
            let session = profiles
                .sso_session(session_name)
                .ok_or_else(|| ApiError::Credentials(format!("{owner} names sso_session '{session_name}', which does not exist")))?;
            let session_owner = format!("sso-session '{session_name}'");
            (
                Some(session_name.to_string()),
                require(session, "sso_start_url", &session_owner)?,
                require(session, "sso_region", &session_owner)?,
            )
        }
        None => (None, require(profile, "sso_start_url", &owner)?, require(profile, "sso_region", &owner)?),
    };
    let home = env
        .home()
        .ok_or_else(|| ApiError::Credentials("cannot locate the SSO token cache without a home directory".into()))?;
    let portal_endpoint = match env.var("AWS_ENDPOINT_URL_SSO") {
        Some(raw) => validate_endpoint(raw, "AWS_ENDPOINT_URL_SSO")?,
        None => sso::portal_endpoint(&sso_region)?,
    };
    Ok(CredentialSource::Sso(SsoRole {
        session_name,
        start_url,
        account_id: require(profile, "sso_account_id", &owner)?,
        role_name: require(profile, "sso_role_name", &owner)?,
        sso_region,
        cache_dir: home.join(".aws").join("sso").join("cache"),
        portal_endpoint,
    }))
}

fn container_source(env: &Environment) -> Result<Option<CredentialSource>, ApiError> {
    let uri = if let Some(relative) = env.var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
        Url::parse(&format!("{CONTAINER_HOST}{relative}"))
            .map_err(|e| ApiError::Credentials(format!("invalid AWS_CONTAINER_CREDENTIALS_RELATIVE_URI '{relative}': {e}")))?
    } else if let Some(full) = env.var("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
        let uri = Url::parse(full).map_err(|e| ApiError::Credentials(format!("invalid AWS_CONTAINER_CREDENTIALS_FULL_URI '{full}': {e}")))?;
        let host = uri.host_str().unwrap_or_default();
        let allowed = uri.scheme() == "https" || CONTAINER_HTTP_HOSTS.iter().any(|allowed| host.eq_ignore_ascii_case(allowed));
        if !allowed {
            return Err(ApiError::Credentials(format!(
                "AWS_CONTAINER_CREDENTIALS_FULL_URI must use https or a loopback/container host; got '{full}'"
            )));
        }
        uri
    } else {
        return Ok(None);
    };
    let auth = match env.var("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE") {
        Some(path) => Some(ContainerAuth::TokenFile(PathBuf::from(path))),
        None => env
            .var("AWS_CONTAINER_AUTHORIZATION_TOKEN")
            .map(|token| ContainerAuth::Token(token.to_string())),
    };
    Ok(Some(CredentialSource::Container { uri, auth }))
}

fn imds_endpoint(env: &Environment) -> Result<Url, ApiError> {
    let raw = env.var("AWS_EC2_METADATA_SERVICE_ENDPOINT").unwrap_or(DEFAULT_IMDS_ENDPOINT);
    Url::parse(raw).map_err(|e| ApiError::Credentials(format!("invalid instance metadata endpoint '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[default]
region = us-west-2

[profile admin]
role_arn = arn:aws:iam::123456789012:role/Admin
source_profile = base
role_session_name = nightly
external_id = ext-1
duration_seconds = 1800

[profile base]
aws_access_key_id = AKIDBASE
aws_secret_access_key = secret-base

[profile chained]
role_arn = arn:aws:iam::123456789012:role/Chained
source_profile = admin

[profile loop-a]
role_arn = arn:aws:iam::123456789012:role/A
source_profile = loop-b

[profile loop-b]
role_arn = arn:aws:iam::123456789012:role/B
source_profile = loop-a

[profile self-sourced]
role_arn = arn:aws:iam::123456789012:role/Self
source_profile = self-sourced
aws_access_key_id = AKIDSELF
aws_secret_access_key = secret-self

[profile on-ecs]
role_arn = arn:aws:iam::123456789012:role/Task
credential_source = EcsContainer

[profile eks]
role_arn = arn:aws:iam::123456789012:role/Pod
web_identity_token_file = /var/run/secrets/token

[profile analyst]
sso_session = corp
sso_account_id = 123456789012
sso_role_name = OmicsAnalyst

[profile legacy-sso]
sso_start_url = https://legacy.awsapps.com/start
sso_region = eu-west-1
sso_account_id = 210987654321
sso_role_name = Reader

[profile broken-sso]
sso_session = missing
sso_account_id = 1
sso_role_name = R

[sso-session corp]
sso_start_url = https://corp.awsapps.com/start
sso_region = us-east-1

[profile scripted]
credential_process = /usr/local/bin/get-creds --account 1

[profile mfa]
role_arn = arn:aws:iam::123456789012:role/Admin
source_profile = base
mfa_serial = arn:aws:iam::123456789012:mfa/me
"#;

    fn profiles() -> ProfileSet {
        ProfileSet::parse("", CONFIG)
    }

    fn env(vars: &[(&str, &str)]) -> Environment {
        Environment::from_vars(vars.iter().copied()).with_home("/home/user")
    }

    #[test]
    fn environment_keys_come_first() {
        let source = CredentialSource::discover(
            &env(&[
                ("AWS_ACCESS_KEY_ID", "AKIDENV"),
                ("AWS_SECRET_ACCESS_KEY", "secret"),
                ("AWS_SESSION_TOKEN", "token"),
                ("AWS_PROFILE", "admin"),
            ]),
            &profiles(),
        )
        .unwrap();
        assert_eq!(source, CredentialSource::Static(Credentials::new("AKIDENV", "secret").with_session_token("token")));
    }

    #[test]
    fn role_profiles_assume_from_their_source_profile() {
        let source = CredentialSource::discover(&env(&[("AWS_PROFILE", "admin")]), &profiles()).unwrap();
        assert_eq!(
            source,
            CredentialSource::AssumeRole(AssumeRole {
                role_arn: "arn:aws:iam::123456789012:role/Admin".into(),
                session_name: "nightly".into(),
                external_id: Some("ext-1".into()),
                duration_seconds: Some(1800),
                source: Box::new(CredentialSource::Static(Credentials::new("AKIDBASE", "secret-base"))),
            })
        );
    }

    #[test]
    fn source_profiles_chain_and_loops_are_rejected() {
        let chained = CredentialSource::discover(&env(&[("AWS_PROFILE", "chained")]), &profiles()).unwrap();
        let CredentialSource::AssumeRole(outer) = chained else {
            panic!("expected role assumption, got {chained:?}");
        };
        assert!(matches!(*outer.source, CredentialSource::AssumeRole(ref inner) if inner.role_arn.ends_with("role/Admin")));

        let err = CredentialSource::discover(&env(&[("AWS_PROFILE", "loop-a")]), &profiles()).unwrap_err();
        assert!(err.to_string().contains("loops"), "{err}");
    }

    #[test]
    fn self_sourced_profiles_use_their_own_keys() {
        let source = CredentialSource::discover(&env(&[("AWS_PROFILE", "self-sourced")]), &profiles()).unwrap();
        let CredentialSource::AssumeRole(assume) = source else {
            panic!("expected role assumption");
        };
        assert_eq!(*assume.source, CredentialSource::Static(Credentials::new("AKIDSELF", "secret-self")));
    }

    #[test]
    fn credential_source_uses_the_container_endpoint() {
        let source = CredentialSource::discover(
            &env(&[
                ("AWS_PROFILE", "on-ecs"),
                ("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/credentials/abc"),
            ]),
            &profiles(),
        )
        .unwrap();
        let CredentialSource::AssumeRole(assume) = source else {
            panic!("expected role assumption");
        };
        assert_eq!(
            *assume.source,
            CredentialSource::Container {
                uri: Url::parse("http://169.254.170.2/v2/credentials/abc").unwrap(),
                auth: None,
            }
        );

        let err = CredentialSource::discover(&env(&[("AWS_PROFILE", "on-ecs")]), &profiles()).unwrap_err();
        assert!(err.to_string().contains("EcsContainer"), "{err}");
    }

    #[test]
    fn web_identity_from_profile_or_environment() {
        let source = CredentialSource::discover(&env(&[("AWS_PROFILE", "eks")]), &profiles()).unwrap();
        assert!(matches!(source, CredentialSource::WebIdentity { ref token_file, .. } if token_file == &PathBuf::from("/var/run/secrets/token")));

        let source = CredentialSource::discover(
            &env(&[
                ("AWS_WEB_IDENTITY_TOKEN_FILE", "/tmp/token"),
                ("AWS_ROLE_ARN", "arn:aws:iam::123456789012:role/Pod"),
                ("AWS_ROLE_SESSION_NAME", "pod-1"),
            ]),
            &ProfileSet::default(),
        )
        .unwrap();
        assert_eq!(
            source,
            CredentialSource::WebIdentity {
                role_arn: "arn:aws:iam::123456789012:role/Pod".into(),
                token_file: PathBuf::from("/tmp/token"),
                session_name: "pod-1".into(),
            }
        );
    }

    #[test]
    fn sso_profiles_resolve_sessions_and_legacy_settings() {
        let source = CredentialSource::discover(&env(&[("AWS_PROFILE", "analyst")]), &profiles()).unwrap();
        let CredentialSource::Sso(role) = source else {
            panic!("expected SSO");
        };
        assert_eq!(role.session_name.as_deref(), Some("corp"));
        assert_eq!(role.start_url, "https://corp.awsapps.com/start");
        assert_eq!(role.sso_region, "us-east-1");
        assert_eq!(role.role_name, "OmicsAnalyst");
        assert_eq!(role.cache_dir, PathBuf::from("/home/user/.aws/sso/cache"));
        assert_eq!(role.portal_endpoint.as_str(), "https://portal.sso.us-east-1.amazonaws.com/");

        let source = CredentialSource::discover(&env(&[("AWS_PROFILE", "legacy-sso")]), &profiles()).unwrap();
        assert!(matches!(source, CredentialSource::Sso(ref role) if role.session_name.is_none() && role.sso_region == "eu-west-1"));

        let err = CredentialSource::discover(&env(&[("AWS_PROFILE", "broken-sso")]), &profiles()).unwrap_err();
        assert!(err.to_string().contains("sso_session 'missing'"), "{err}");
    }

    #[test]
    fn credential_process_profiles() {
        let source = CredentialSource::discover(&env(&[("AWS_PROFILE", "scripted")]), &profiles()).unwrap();
        assert_eq!(
            source,
            CredentialSource::Process {
                command: "/usr/local/bin/get-creds --account 1".into()
            }
        );
    }

    #[test]
    fn mfa_profiles_are_rejected() {
        let err = CredentialSource::discover(&env(&[("AWS_PROFILE", "mfa")]), &profiles()).unwrap_err();
        assert!(err.to_string().contains("mfa_serial"), "{err}");
    }

    #[test]
    fn missing_explicit_profile_is_an_error() {
        let err = CredentialSource::discover(&env(&[("AWS_PROFILE", "nope")]), &profiles()).unwrap_err();
        assert!(matches!(err, ApiError::Credentials(_)));
    }

    #[test]
    fn container_then_instance_metadata_are_the_fallbacks() {
        let source = CredentialSource::discover(
            &env(&[
                ("AWS_CONTAINER_CREDENTIALS_FULL_URI", "http://169.254.170.23/v1/credentials"),
                ("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE", "/var/run/secrets/pods.eks.amazonaws.com/token"),
            ]),
            &profiles(),
        )
        .unwrap();
        assert!(matches!(source, CredentialSource::Container { auth: Some(ContainerAuth::TokenFile(_)), .. }));

        let err = CredentialSource::discover(&env(&[("AWS_CONTAINER_CREDENTIALS_FULL_URI", "http://example.com/creds")]), &profiles())
            .unwrap_err();
        assert!(err.to_string().contains("https"), "{err}");

        let source = CredentialSource::discover(&env(&[]), &profiles()).unwrap();
        assert_eq!(
            source,
            CredentialSource::InstanceMetadata {
                endpoint: Url::parse("http://169.254.169.254").unwrap()
            }
        );

        let err = CredentialSource::discover(&env(&[("AWS_EC2_METADATA_DISABLED", "true")]), &profiles()).unwrap_err();
        assert!(err.to_string().contains("instance metadata is disabled"), "{err}");
    }

    #[test]
    fn display_names_the_provider_without_secrets() {
        let source = CredentialSource::Static(Credentials::new("AKID", "secret"));
        assert_eq!(source.to_string(), "static credentials");
        let auth = ContainerAuth::Token("very-secret".into());
        assert!(!format!("{auth:?}").contains("very-secret"));
    }
}
