pub mod referral;
pub mod repo;
pub mod repo_types;

pub use repo::{StoreError, UserStore};
pub use repo_types::{NewUser, Role, User, UserPatch};
