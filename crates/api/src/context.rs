use songsmith_billing::User;
use songsmith_core::UserId;

/// The authenticated caller of a request.
///
/// Inserted by the auth middleware after the token verified and the user was
/// found, so handlers never see an unknown user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    user: User,
}

impl UserContext {
    pub fn new(user: User) -> Self {
        Self { user }
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn user(&self) -> &User {
        &self.user
    }
}
