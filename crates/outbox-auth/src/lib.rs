//! OAuth 2.0 device authorization for Microsoft identity and Google accounts.

pub mod device_code;
pub mod endpoints;
pub mod http;
pub mod provider;

pub use device_code::FlowState;
pub use endpoints::{resolve_authority, send_scopes, OAuthClient};
pub use http::{OAuthHttp, OAuthReply, RecordedRequest, ReqwestOAuthHttp, ScriptedOAuthHttp};
pub use provider::DeviceCodeTokenProvider;
