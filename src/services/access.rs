use crate::middleware::auth::AuthenticatedUser;
use crate::models::user::UserRole;

/// Officials may initiate payments and file receipts on behalf of another
/// member.
pub fn can_act_on_behalf(user: &AuthenticatedUser) -> bool {
    matches!(
        user.user_role,
        UserRole::SuperAdmin | UserRole::Admin | UserRole::Treasurer
    )
}

/// Finance oversight: approval decisions and pending-queue visibility.
pub fn is_finance_official(user: &AuthenticatedUser) -> bool {
    matches!(
        user.user_role,
        UserRole::SuperAdmin | UserRole::Admin | UserRole::Treasurer
    )
}

/// Deactivated accounts keep read access but cannot move money.
pub fn is_interactive(user: &AuthenticatedUser) -> bool {
    user.is_active
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user_with(role: UserRole, active: bool) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::new_v4(),
            email: "member@example.com".to_string(),
            user_role: role,
            is_active: active,
        }
    }

    #[test]
    fn members_cannot_act_on_behalf() {
        assert!(!can_act_on_behalf(&user_with(UserRole::Member, true)));
        assert!(can_act_on_behalf(&user_with(UserRole::Treasurer, true)));
        assert!(can_act_on_behalf(&user_with(UserRole::Admin, true)));
    }

    #[test]
    fn finance_oversight_excludes_members() {
        assert!(is_finance_official(&user_with(UserRole::Treasurer, true)));
        assert!(is_finance_official(&user_with(UserRole::SuperAdmin, true)));
        assert!(!is_finance_official(&user_with(UserRole::Member, true)));
    }

    #[test]
    fn deactivated_accounts_are_read_only() {
        assert!(is_interactive(&user_with(UserRole::Member, true)));
        assert!(!is_interactive(&user_with(UserRole::Treasurer, false)));
    }
}
