//! Identity core: sessions, verification codes, credentials and the unit of
//! work tying them together.
//!
//! Registration validates the code first, then creates the user and binds it to
//! the caller's session on one [`transaction::UnitOfWork`], committing last.

pub mod codes;
pub mod credentials;
pub mod session;
pub mod state;
pub mod transaction;

pub use codes::{CodeEngine, CodeKind, CodePolicy};
pub use credentials::User;
pub use session::{Session, SessionId, SessionManager};
pub use state::{AuthConfig, AuthState};
pub use transaction::UnitOfWork;
