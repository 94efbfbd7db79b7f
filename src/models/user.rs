use bson::{oid::ObjectId, Bson, DateTime, Document};
use serde::{Deserialize, Serialize};

use crate::db::query::Filter;
use crate::error::AppError;
use crate::models::resource::{DeleteMode, Resource, SaveContext};
use crate::services::auth_service;
use crate::services::validation::{FieldKind, FieldRule, Rule, ValidationErrors};

pub const USERS: &str = "users";

/// Never returned to clients, whichever route reads the user.
pub const USER_HIDDEN_FIELDS: &[&str] = &[
    "password",
    "active",
    "passwordResetToken",
    "passwordResetExpires",
];

/// `passwordChangedAt` is backdated so a token issued right after the change stays valid.
const PASSWORD_CHANGE_GRACE_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default)]
    pub role: Role,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_confirm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_reset_expires: Option<DateTime>,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(rename = "__v", default)]
    pub version: i32,
}

fn active_by_default() -> bool {
    true
}

fn yes() -> Bson {
    Bson::Boolean(true)
}

fn default_photo() -> Bson {
    Bson::String("default.jpg".to_string())
}

fn default_role() -> Bson {
    Bson::String(Role::User.as_str().to_string())
}

const USER_RULES: &[FieldRule] = &[
    FieldRule::new(
        "name",
        FieldKind::Text,
        &[Rule::Trim, Rule::Required("Please tell us your name!")],
    ),
    FieldRule::new(
        "email",
        FieldKind::Text,
        &[
            Rule::Trim,
            Rule::Lowercase,
            Rule::Required("Please provide your email"),
            Rule::Email("Please provide a valid email"),
        ],
    ),
    FieldRule::new(
        "photo",
        FieldKind::Text,
        &[Rule::Trim, Rule::Default(default_photo)],
    ),
    FieldRule::new(
        "role",
        FieldKind::Text,
        &[
            Rule::Default(default_role),
            Rule::OneOf(
                &["user", "guide", "lead-guide", "admin"],
                "Role is either: user, guide, lead-guide, admin",
            ),
        ],
    ),
    FieldRule::new(
        "password",
        FieldKind::Text,
        &[
            Rule::Required("Please provide a password"),
            Rule::MinLength(8, "Password must have at least 8 characters"),
        ],
    ),
    FieldRule::new(
        "passwordConfirm",
        FieldKind::Text,
        &[Rule::RequiredOnCreate("Please confirm your password")],
    ),
    FieldRule::new("passwordChangedAt", FieldKind::Date, &[Rule::Internal]),
    FieldRule::new("passwordResetToken", FieldKind::Text, &[Rule::Internal]),
    FieldRule::new("passwordResetExpires", FieldKind::Date, &[Rule::Internal]),
    FieldRule::new("active", FieldKind::Bool, &[Rule::Internal, Rule::Default(yes)]),
];

impl User {
    /// Deactivated users never appear in reads.
    pub fn live() -> Filter {
        Filter::new().ne("active", false)
    }

    /// Whether the password changed after a token issued at `issued_at` (seconds).
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .is_some_and(|changed| issued_at < changed.timestamp_millis() / 1000)
    }
}

impl Resource for User {
    const COLLECTION: &'static str = USERS;

    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn rules() -> &'static [FieldRule] {
        USER_RULES
    }

    fn default_filter() -> Filter {
        User::live()
    }

    fn hidden_fields() -> &'static [&'static str] {
        USER_HIDDEN_FIELDS
    }

    fn delete_mode() -> DeleteMode {
        DeleteMode::SoftMark {
            field: "active",
            value: false,
        }
    }

    fn check_update(patch: &Document) -> Result<(), AppError> {
        if patch.contains_key("password") || patch.contains_key("passwordConfirm") {
            return Err(AppError::BadRequest(
                "This route is not for password updates. Please use /updateMyPassword.".to_string(),
            ));
        }
        Ok(())
    }

    fn validate(&self, ctx: &SaveContext) -> Result<(), ValidationErrors> {
        if !ctx.is_modified("password") {
            return Ok(());
        }
        match &self.password_confirm {
            None => Err(ValidationErrors::single(
                "passwordConfirm",
                "Please confirm your password",
            )),
            Some(confirm) if *confirm != self.password => Err(ValidationErrors::single(
                "passwordConfirm",
                "Passwords are not the same!",
            )),
            Some(_) => Ok(()),
        }
    }

    fn before_save(&mut self, ctx: &SaveContext) -> Result<(), AppError> {
        if !ctx.is_modified("password") {
            return Ok(());
        }
        self.password = auth_service::hash_password(&self.password, ctx.bcrypt_cost)?;
        self.password_confirm = None;
        if !ctx.is_new {
            self.password_changed_at = Some(DateTime::from_millis(
                ctx.now.timestamp_millis() - PASSWORD_CHANGE_GRACE_MS,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resource::SaveOptions;
    use crate::services::validation::{validate_document, Mode};
    use bson::doc;

    const OPTIONS: SaveOptions = SaveOptions { bcrypt_cost: 4 };

    fn signup(confirm: &str) -> User {
        let mut doc = doc! {
            "name": "Ada Lovelace",
            "email": " Ada@Example.com",
            "password": "pass1234",
            "passwordConfirm": confirm,
        };
        validate_document(&mut doc, User::rules(), Mode::Create).unwrap();
        bson::from_document(doc).unwrap()
    }

    #[test]
    fn test_new_user_defaults() {
        let user = signup("pass1234");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.photo.as_deref(), Some("default.jpg"));
        assert!(user.active);
    }

    #[test]
    fn test_confirmation_must_match() {
        let user = signup("different");
        let ctx = SaveContext::new(true, Vec::new(), &OPTIONS);
        let errors = user.validate(&ctx).unwrap_err();
        assert_eq!(errors.to_string(), "Passwords are not the same!");
    }

    #[test]
    fn test_before_save_hashes_and_drops_confirmation() {
        let mut user = signup("pass1234");
        let ctx = SaveContext::new(true, Vec::new(), &OPTIONS);
        user.before_save(&ctx).unwrap();

        assert_ne!(user.password, "pass1234");
        assert!(bcrypt::verify("pass1234", &user.password).unwrap());
        assert!(user.password_confirm.is_none());
        assert!(user.password_changed_at.is_none());

        let stored = bson::to_document(&user).unwrap();
        assert!(!stored.contains_key("passwordConfirm"));
    }

    #[test]
    fn test_password_change_is_tracked_for_existing_users() {
        let mut user = signup("pass1234");
        user.password_confirm = Some("pass1234".to_string());
        let ctx = SaveContext::new(false, vec!["password".to_string()], &OPTIONS);
        user.before_save(&ctx).unwrap();

        let changed = user.password_changed_at.unwrap();
        assert_eq!(
            changed.timestamp_millis(),
            ctx.now.timestamp_millis() - PASSWORD_CHANGE_GRACE_MS
        );
        let changed_secs = changed.timestamp_millis() / 1000;
        assert!(user.changed_password_after(changed_secs - 10));
        assert!(!user.changed_password_after(changed_secs + 10));
    }

    #[test]
    fn test_untouched_password_is_not_rehashed() {
        let mut user = signup("pass1234");
        user.password_confirm = None;
        let ctx = SaveContext::new(false, vec!["name".to_string()], &OPTIONS);
        user.validate(&ctx).unwrap();
        user.before_save(&ctx).unwrap();
        assert_eq!(user.password, "pass1234");
    }

    #[test]
    fn test_password_updates_are_rejected_on_generic_path() {
        assert!(User::check_update(&doc! { "password": "newpass123" }).is_err());
        assert!(User::check_update(&doc! { "name": "Ada" }).is_ok());
    }

    #[test]
    fn test_role_serializes_kebab_case() {
        assert_eq!(
            bson::to_bson(&Role::LeadGuide).unwrap(),
            Bson::String("lead-guide".into())
        );
    }
}
