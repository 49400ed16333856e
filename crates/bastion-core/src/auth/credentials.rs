use std::fmt;

/// Login credentials, fixed for the lifetime of a client.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
    api_key: String,
    cloud: String,
}

impl Credentials {
    pub fn new(username: String, password: String, api_key: String, cloud: String) -> Self {
        Self {
            username,
            password,
            api_key,
            cloud,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn cloud(&self) -> &str {
        &self.cloud
    }
}

// Keep secrets out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("cloud", &self.cloud)
            .finish()
    }
}
