use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;

use karigar_core::domain::account::Account;
use karigar_core::domain::seller::Seller;
use karigar_core::ports::{DocumentRenderer, RenderError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentTemplate {
    Certificate,
    ShippingLabel,
}

#[derive(Debug, Serialize)]
pub struct RenderRequest<'a> {
    pub template: DocumentTemplate,
    pub seller_name: &'a str,
    pub seller: &'a Seller,
    pub account: &'a Account,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    url: String,
}

/// Posts seller and account data to the document service, which answers
/// with the URL of the rendered PDF.
pub struct HttpDocumentRenderer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpDocumentRenderer {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self { http, base_url: base_url.into(), api_key }
    }

    fn endpoint(&self) -> String {
        format!("{}/render", self.base_url.trim_end_matches('/'))
    }

    async fn render(
        &self,
        template: DocumentTemplate,
        seller: &Seller,
        account: &Account,
    ) -> Result<String, RenderError> {
        let body = RenderRequest { template, seller_name: seller.display_name(), seller, account };
        let mut request = self.http.post(self.endpoint()).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| RenderError::Service(error.to_string()))?;
        let payload = response
            .json::<RenderResponse>()
            .await
            .map_err(|error| RenderError::InvalidResponse(error.to_string()))?;
        let url = checked_url(payload.url)?;

        info!(
            event_name = "storage.document.rendered",
            template = ?template,
            seller_email = %seller.email,
            "document rendered"
        );
        Ok(url)
    }
}

fn checked_url(url: String) -> Result<String, RenderError> {
    let trimmed = url.trim();
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        Ok(trimmed.to_owned())
    } else {
        Err(RenderError::InvalidResponse(format!("expected a document URL, got `{url}`")))
    }
}

#[async_trait]
impl DocumentRenderer for HttpDocumentRenderer {
    async fn render_certificate(&self, seller: &Seller, account: &Account) -> Result<String, RenderError> {
        self.render(DocumentTemplate::Certificate, seller, account).await
    }

    async fn render_shipping_label(
        &self,
        seller: &Seller,
        account: &Account,
    ) -> Result<String, RenderError> {
        self.render(DocumentTemplate::ShippingLabel, seller, account).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use karigar_core::domain::account::{Account, AccountRole};
    use karigar_core::domain::seller::Seller;
    use karigar_core::ports::RenderError;

    use super::{checked_url, DocumentTemplate, HttpDocumentRenderer, RenderRequest};

    #[test]
    fn request_body_names_the_template_and_seller() {
        let seller = Seller::new("meera@crafts.in", Utc::now());
        let account = Account {
            email: "meera@crafts.in".to_owned(),
            name: "Meera".to_owned(),
            phone: None,
            city: Some("Khurja".to_owned()),
            role: AccountRole::Seller,
            chat_id: None,
            balance: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let body = RenderRequest {
            template: DocumentTemplate::ShippingLabel,
            seller_name: seller.display_name(),
            seller: &seller,
            account: &account,
        };

        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["template"], "shipping_label");
        assert_eq!(json["seller_name"], "meera@crafts.in");
        assert_eq!(json["account"]["city"], "Khurja");
    }

    #[test]
    fn rendered_urls_must_be_http() {
        assert_eq!(checked_url(" https://docs.test/c/1.pdf ".to_owned()).expect("url"), "https://docs.test/c/1.pdf");
        assert!(matches!(checked_url(String::new()), Err(RenderError::InvalidResponse(_))));
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let renderer = HttpDocumentRenderer::new(reqwest::Client::new(), "http://docs.test/", None);
        assert_eq!(renderer.endpoint(), "http://docs.test/render");
    }
}
