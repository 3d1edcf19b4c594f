use crate::application::session::SessionManager;
use crate::domain::forms::{ForgotPasswordForm, LoginForm, RegisterForm, ResetPasswordForm};
use crate::domain::models::{LoginResponse, User};
use crate::infrastructure::api_transport::{ApiRequest, ApiResponse, ApiTransport, HttpMethod};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use serde::Serialize;
use std::sync::Arc;

/// Unauthenticated account endpoints. Every form is validated locally first.
pub struct AccountService<T, S>
where
    T: ApiTransport,
    S: CredentialStore + ?Sized,
{
    transport: Arc<T>,
    session: Arc<SessionManager<T, S>>,
}

impl<T, S> AccountService<T, S>
where
    T: ApiTransport,
    S: CredentialStore + ?Sized,
{
    pub fn new(transport: Arc<T>, session: Arc<SessionManager<T, S>>) -> Self {
        Self { transport, session }
    }

    /// Logs in and returns the destination the session navigated to.
    pub async fn login_user(&self, form: &LoginForm, next: Option<&str>) -> Result<String, InfraError> {
        form.validate().map_err(InfraError::Validation)?;
        let body = LoginForm {
            email: form.email.trim().to_string(),
            password: form.password.clone(),
        };
        let response = self.post(["users", "login"], &body).await?;
        let login: LoginResponse = response.json()?;
        self.session.store_cookies(&response.set_cookies)?;
        Ok(self.session.login(&login.access_token, Some(&body.email), next))
    }

    pub async fn register_user(&self, form: &RegisterForm) -> Result<User, InfraError> {
        form.validate().map_err(InfraError::Validation)?;
        let body = RegisterForm {
            email: form.email.trim().to_string(),
            ..form.clone()
        };
        let user = self.post(["users", "register"], &body).await?.json()?;
        tracing::info!(email = %body.email, "account registered");
        Ok(user)
    }

    pub async fn forgot_password(&self, form: &ForgotPasswordForm) -> Result<(), InfraError> {
        form.validate().map_err(InfraError::Validation)?;
        let body = ForgotPasswordForm {
            email: form.email.trim().to_string(),
        };
        self.post(["users", "forgot-password"], &body).await?;
        Ok(())
    }

    pub async fn reset_password(&self, form: &ResetPasswordForm) -> Result<(), InfraError> {
        form.validate().map_err(InfraError::Validation)?;
        let body = ResetPasswordForm {
            token: form.token.trim().to_string(),
            ..form.clone()
        };
        self.post(["users", "reset-password"], &body).await?;
        Ok(())
    }

    async fn post<B: Serialize>(&self, segments: [&str; 2], body: &B) -> Result<ApiResponse, InfraError> {
        let request = ApiRequest::new(HttpMethod::Post, segments).with_json(body)?;
        self.transport.send(request).await?.error_for_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session::RecordingNavigator;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use crate::test_support::ScriptedTransport;

    type Fixture = (
        AccountService<ScriptedTransport, InMemoryCredentialStore>,
        Arc<SessionManager<ScriptedTransport, InMemoryCredentialStore>>,
        Arc<ScriptedTransport>,
        Arc<InMemoryCredentialStore>,
    );

    fn fixture(transport: ScriptedTransport) -> Fixture {
        let transport = Arc::new(transport);
        let store = Arc::new(InMemoryCredentialStore::default());
        let session = Arc::new(SessionManager::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::new(RecordingNavigator::default()),
        ));
        let service = AccountService::new(Arc::clone(&transport), Arc::clone(&session));
        (service, session, transport, store)
    }

    fn unreachable_transport() -> ScriptedTransport {
        ScriptedTransport::new(|request| panic!("unexpected request to {}", request.path()))
    }

    #[tokio::test]
    async fn login_captures_cookies_and_authenticates() {
        let (service, session, _, store) = fixture(ScriptedTransport::new(|request| {
            assert_eq!(request.path(), "/users/login");
            let body = request.body.as_ref().expect("body");
            assert_eq!(body["email"], "ada@example.com");
            let mut response = ApiResponse::new(200, r#"{"access_token":"access-1","token_type":"bearer"}"#);
            response.set_cookies = vec![
                "refresh_token=r-1; HttpOnly; Path=/api/users/refresh".to_string(),
                "csrf_token=c-1; Path=/".to_string(),
                "session=s-1; HttpOnly; Path=/".to_string(),
            ];
            Ok(response)
        }));

        let form = LoginForm {
            email: "  ada@example.com ".to_string(),
            password: "correct horse".to_string(),
        };
        let destination = service.login_user(&form, Some("/tasks")).await.expect("login");

        assert_eq!(destination, "/tasks");
        let snapshot = session.snapshot();
        assert!(snapshot.is_authenticated);
        assert_eq!(snapshot.access_token.as_deref(), Some("access-1"));
        assert_eq!(snapshot.user_email.as_deref(), Some("ada@example.com"));
        let stored = store.load_credential().expect("load").expect("stored");
        assert_eq!(stored.session.as_deref(), Some("s-1"));
    }

    #[tokio::test]
    async fn rejected_login_surfaces_server_message() {
        let (service, session, _, _) = fixture(ScriptedTransport::new(|_| {
            Ok(ApiResponse::new(
                401,
                r#"{"detail":{"code":"INVALID_CREDENTIALS","message":"Invalid credentials."}}"#,
            ))
        }));
        let form = LoginForm {
            email: "ada@example.com".to_string(),
            password: "wrong password".to_string(),
        };

        let error = service.login_user(&form, None).await.expect_err("rejected");
        assert_eq!(error.user_message(), "Invalid credentials.");
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn invalid_forms_never_reach_the_network() {
        let (service, _, transport, _) = fixture(unreachable_transport());

        let login = service.login_user(&LoginForm::default(), None).await;
        assert!(matches!(login, Err(InfraError::Validation(ref errors)) if errors.get("email").is_some()));

        let register = RegisterForm {
            email: "ada@example.com".to_string(),
            password: "long enough".to_string(),
            confirm_password: "different".to_string(),
        };
        match service.register_user(&register).await {
            Err(InfraError::Validation(errors)) => {
                assert_eq!(errors.get("confirm_password"), Some("Passwords do not match."));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        let reset = ResetPasswordForm {
            token: " ".to_string(),
            new_password: "long enough".to_string(),
            confirm_password: "long enough".to_string(),
        };
        assert!(matches!(service.reset_password(&reset).await, Err(InfraError::Validation(_))));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn register_returns_the_created_user_and_skips_confirmation() {
        let (service, _, _, _) = fixture(ScriptedTransport::new(|request| {
            let body = request.body.as_ref().expect("body");
            assert!(body.get("confirm_password").is_none());
            Ok(ApiResponse::new(201, r#"{"id": 3, "email": "ada@example.com"}"#))
        }));
        let form = RegisterForm {
            email: "ada@example.com".to_string(),
            password: "long enough".to_string(),
            confirm_password: "long enough".to_string(),
        };
        let user = service.register_user(&form).await.expect("registered");
        assert_eq!(user.email, "ada@example.com");
    }

    #[tokio::test]
    async fn password_reset_round_trip_accepts_empty_bodies() {
        let (service, _, transport, _) = fixture(ScriptedTransport::new(|request| match request.path().as_str() {
            "/users/forgot-password" => Ok(ApiResponse::new(204, "")),
            "/users/reset-password" => {
                let body = request.body.as_ref().expect("body");
                assert_eq!(body["token"], "abc123");
                assert_eq!(body["new_password"], "brand new secret");
                Ok(ApiResponse::new(204, ""))
            }
            other => panic!("unexpected request to {other}"),
        }));

        service
            .forgot_password(&ForgotPasswordForm {
                email: "ada@example.com".to_string(),
            })
            .await
            .expect("requested");
        service
            .reset_password(&ResetPasswordForm {
                token: " abc123 ".to_string(),
                new_password: "brand new secret".to_string(),
                confirm_password: "brand new secret".to_string(),
            })
            .await
            .expect("reset");
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn unknown_email_on_forgot_password_is_reported() {
        let (service, _, _, _) = fixture(ScriptedTransport::new(|_| {
            Ok(ApiResponse::new(404, r#"{"detail":{"code":"USER_NOT_FOUND","message":"User not found."}}"#))
        }));
        let error = service
            .forgot_password(&ForgotPasswordForm {
                email: "nobody@example.com".to_string(),
            })
            .await
            .expect_err("missing user");
        assert_eq!(error.user_message(), "User not found.");
    }
}
