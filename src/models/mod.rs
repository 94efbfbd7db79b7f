pub mod resource;
pub mod review;
pub mod tour;
pub mod user;

use crate::db::UniqueIndex;

pub use resource::{DeleteMode, Relation, Resource, SaveContext, SaveOptions, Select};
pub use review::Review;
pub use tour::{Difficulty, Tour};
pub use user::{Role, User};

pub const UNIQUE_INDEXES: &[UniqueIndex] = &[
    UniqueIndex {
        collection: tour::TOURS,
        fields: &["name"],
    },
    UniqueIndex {
        collection: user::USERS,
        fields: &["email"],
    },
    UniqueIndex {
        collection: review::REVIEWS,
        fields: &["tour", "user"],
    },
];
