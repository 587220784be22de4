use serde::{Deserialize, Serialize};

/// Claims carried by the gateway-issued permission token. The raw token
/// string itself travels through the service as `secure_permissions` so the
/// downstream clients that need it (report engine) can forward it untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,    // user id
    pub tenant: String, // tenant id
    pub exp: usize,     // expiration time
    pub iat: usize,     // issued at
}

/// Raw bearer token as received, stashed in request extensions by the auth
/// middleware alongside the decoded claims.
#[derive(Debug, Clone)]
pub struct SecurePermissions(pub String);
