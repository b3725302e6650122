// Request payloads handed to the installer and to the job dispatcher

use serde::Serialize;
use std::fmt;

/// Database settings entered by the operator.
#[derive(Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Table prefix; generated when absent or empty.
    pub prefix: Option<String>,
}

impl DbCredentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Supplied prefix, if it is non-empty.
    pub fn explicit_prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Company created during install. Currency and enabled flag are fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyRequest {
    pub name: String,
    pub domain: String,
    pub email: String,
    pub currency: String,
    pub locale: String,
    pub enabled: String,
}

impl CompanyRequest {
    pub fn new(name: &str, email: &str, locale: &str) -> Self {
        Self {
            name: name.to_string(),
            domain: String::new(),
            email: email.to_string(),
            currency: "USD".to_string(),
            locale: locale.to_string(),
            enabled: "1".to_string(),
        }
    }
}

/// Administrator created during install, linked to the first company and role.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct UserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub locale: String,
    pub companies: Vec<String>,
    pub roles: Vec<String>,
    pub enabled: String,
}

impl UserRequest {
    pub fn new(email: &str, password: &str, locale: &str) -> Self {
        Self {
            name: String::new(),
            email: email.to_string(),
            password: password.to_string(),
            locale: locale.to_string(),
            companies: vec!["1".to_string()],
            roles: vec!["1".to_string()],
            enabled: "1".to_string(),
        }
    }
}

impl fmt::Debug for UserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"***")
            .field("locale", &self.locale)
            .field("companies", &self.companies)
            .field("roles", &self.roles)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Everything a full unattended install needs from the operator.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub database: DbCredentials,
    pub company_name: String,
    pub company_email: String,
    pub admin_email: String,
    pub admin_password: Secret,
}

/// String that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_defaults() {
        let c = CompanyRequest::new("Acme", "ops@acme.test", "en-GB");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "name": "Acme",
                "domain": "",
                "email": "ops@acme.test",
                "currency": "USD",
                "locale": "en-GB",
                "enabled": "1"
            })
        );
    }

    #[test]
    fn user_defaults_link_first_company_and_role() {
        let u = UserRequest::new("admin@acme.test", "hunter22", "en-GB");
        assert_eq!(u.name, "");
        assert_eq!(u.companies, vec!["1"]);
        assert_eq!(u.roles, vec!["1"]);
        assert_eq!(u.enabled, "1");
    }

    #[test]
    fn debug_output_redacts_passwords() {
        let u = UserRequest::new("admin@acme.test", "hunter22", "en-GB");
        assert!(!format!("{:?}", u).contains("hunter22"));
        let c = DbCredentials::new("h", 3306, "d", "u", "hunter22");
        assert!(!format!("{:?}", c).contains("hunter22"));
    }

    #[test]
    fn plan_debug_hides_admin_password() {
        let plan = InstallPlan {
            database: DbCredentials::new("h", 3306, "d", "u", "dbpass"),
            company_name: "Acme".to_string(),
            company_email: "ops@acme.test".to_string(),
            admin_email: "admin@acme.test".to_string(),
            admin_password: Secret::new("hunter22"),
        };
        let rendered = format!("{:?}", plan);
        assert!(!rendered.contains("hunter22"));
        assert!(!rendered.contains("dbpass"));
        assert_eq!(plan.admin_password.expose(), "hunter22");
    }

    #[test]
    fn empty_prefix_counts_as_absent() {
        let c = DbCredentials::new("h", 3306, "d", "u", "p");
        assert_eq!(c.explicit_prefix(), None);
        assert_eq!(c.clone().with_prefix("").explicit_prefix(), None);
        assert_eq!(c.with_prefix("ak_").explicit_prefix(), Some("ak_"));
    }
}
