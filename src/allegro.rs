use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::orders::{parse_payments, OrderParseError, Payment};
use crate::payment::{AllegroOrderPayment, AllegroOrderPayments};

pub const ALLEGRO_API_URL: &str = "https://api.allegro.pl";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Marketplace API failure, split so callers can render "log in again"
/// separately from "try again later".
#[derive(Debug, Error)]
pub enum AllegroError {
    #[error("marketplace authentication failed (status {status})")]
    Auth { status: u16 },
    #[error("marketplace api error: {message}")]
    Api { status: Option<u16>, message: String },
    #[error("marketplace request timed out")]
    Timeout,
    #[error("marketplace response parse error: {0}")]
    Parse(String),
}

impl From<OrderParseError> for AllegroError {
    fn from(err: OrderParseError) -> Self {
        AllegroError::Parse(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub login: String,
}

/// One marketplace credential. `id` is the local secret id; the cookie
/// value never leaves the client.
#[derive(Debug, Clone)]
pub struct AllegroAccount {
    pub id: Uuid,
    pub secret: String,
    pub login: Option<String>,
}

#[async_trait]
pub trait AllegroClient: Send + Sync {
    async fn get_user_info(&self) -> Result<UserInfo, AllegroError>;

    async fn get_orders(&self) -> Result<Vec<Payment>, AllegroError>;
}

/// Fetches order payments for marketplace accounts, resolving the account
/// login through a user-info call when the caller does not know it yet.
pub struct AllegroService<A> {
    client_factory: Arc<dyn Fn(&str) -> A + Send + Sync>,
}

impl<A: AllegroClient> AllegroService<A> {
    pub fn new(client_factory: impl Fn(&str) -> A + Send + Sync + 'static) -> Self {
        Self {
            client_factory: Arc::new(client_factory),
        }
    }

    pub async fn fetch(
        &self,
        account: &AllegroAccount,
    ) -> Result<AllegroOrderPayments, AllegroError> {
        let client = (self.client_factory)(&account.secret);

        let login = match &account.login {
            Some(login) => login.clone(),
            None => client.get_user_info().await?.login,
        };

        let raw = client.get_orders().await?;
        for payment in &raw {
            debug!("{}", payment.summary());
        }

        let payments = raw
            .iter()
            .map(|p| AllegroOrderPayment::from_payment(p, &login))
            .collect();

        Ok(AllegroOrderPayments { payments })
    }

    pub async fn batch_fetch(
        &self,
        accounts: &[AllegroAccount],
    ) -> Result<AllegroOrderPayments, AllegroError> {
        let mut payments = Vec::new();
        for account in accounts {
            payments.extend(self.fetch(account).await?.payments);
        }
        Ok(AllegroOrderPayments { payments })
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

fn map_transport_error(err: reqwest::Error) -> AllegroError {
    if err.is_timeout() {
        AllegroError::Timeout
    } else {
        AllegroError::Api {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

/// Cookie-session client for the marketplace API.
pub struct AllegroApiClient {
    http: reqwest::Client,
    cookie: String,
    base_url: String,
}

impl AllegroApiClient {
    pub fn new(cookie: impl Into<String>) -> Result<Self, AllegroError> {
        Self::with_base_url(cookie, ALLEGRO_API_URL)
    }

    pub fn with_base_url(
        cookie: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, AllegroError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AllegroError::Api {
                status: None,
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            cookie: cookie.into(),
            base_url: base_url.into(),
        })
    }

    async fn get_json(
        &self,
        path: &str,
        api_version: u8,
    ) -> Result<serde_json::Value, AllegroError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("Cookie", format!("QXLSESSID={}", self.cookie))
            .header(
                "Accept",
                format!("application/vnd.allegro.public.v{}+json", api_version),
            )
            .header("Referer", "https://allegro.pl/")
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AllegroError::Auth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AllegroError::Api {
                status: Some(status.as_u16()),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AllegroError::Parse(e.to_string()))
    }
}

#[async_trait]
impl AllegroClient for AllegroApiClient {
    async fn get_user_info(&self) -> Result<UserInfo, AllegroError> {
        let value = self.get_json("/users", 2).await?;
        let login = value
            .pointer("/accounts/allegro/login")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AllegroError::Parse("missing login in user info response".into()))?;
        Ok(UserInfo {
            login: login.to_owned(),
        })
    }

    async fn get_orders(&self) -> Result<Vec<Payment>, AllegroError> {
        let value = self.get_json("/myorder-api/myorders?limit=25", 3).await?;
        Ok(parse_payments(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::make_payment;

    #[derive(Clone)]
    struct StubAllegro {
        login: String,
        payments: Vec<Payment>,
        fail_auth: bool,
    }

    #[async_trait]
    impl AllegroClient for StubAllegro {
        async fn get_user_info(&self) -> Result<UserInfo, AllegroError> {
            if self.fail_auth {
                return Err(AllegroError::Auth { status: 401 });
            }
            Ok(UserInfo {
                login: self.login.clone(),
            })
        }

        async fn get_orders(&self) -> Result<Vec<Payment>, AllegroError> {
            if self.fail_auth {
                return Err(AllegroError::Auth { status: 401 });
            }
            Ok(self.payments.clone())
        }
    }

    fn account(login: Option<&str>) -> AllegroAccount {
        AllegroAccount {
            id: Uuid::new_v4(),
            secret: "cookie-value".into(),
            login: login.map(str::to_owned),
        }
    }

    fn service(stub: StubAllegro) -> AllegroService<StubAllegro> {
        AllegroService::new(move |_secret| stub.clone())
    }

    #[tokio::test]
    async fn test_fetch_resolves_login_when_unknown() {
        let stub = StubAllegro {
            login: "resolved_login".into(),
            payments: vec![make_payment("pay-1", "24.68")],
            fail_auth: false,
        };

        let result = service(stub).fetch(&account(None)).await.unwrap();

        assert_eq!(result.payments.len(), 1);
        assert_eq!(result.payments[0].allegro_login, "resolved_login");
        assert_eq!(
            result.payments[0].payment.details[0],
            "Buyer: resolved_login"
        );
    }

    #[tokio::test]
    async fn test_fetch_keeps_known_login() {
        let stub = StubAllegro {
            login: "should_not_be_used".into(),
            payments: vec![make_payment("pay-1", "24.68")],
            fail_auth: false,
        };

        let result = service(stub)
            .fetch(&account(Some("known_login")))
            .await
            .unwrap();

        assert_eq!(result.payments[0].allegro_login, "known_login");
    }

    #[tokio::test]
    async fn test_fetch_surfaces_auth_error() {
        let stub = StubAllegro {
            login: "x".into(),
            payments: Vec::new(),
            fail_auth: true,
        };

        let err = service(stub).fetch(&account(None)).await.unwrap_err();

        assert!(matches!(err, AllegroError::Auth { status: 401 }));
    }

    #[tokio::test]
    async fn test_batch_fetch_combines_accounts() {
        let stub = StubAllegro {
            login: "login_a".into(),
            payments: vec![make_payment("pay-1", "10.00"), make_payment("pay-2", "20.00")],
            fail_auth: false,
        };

        let result = service(stub)
            .batch_fetch(&[account(None), account(Some("login_b"))])
            .await
            .unwrap();

        assert_eq!(result.payments.len(), 4);
        assert_eq!(result.payments[0].allegro_login, "login_a");
        assert_eq!(result.payments[2].allegro_login, "login_b");
    }
}
