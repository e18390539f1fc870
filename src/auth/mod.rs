//! Cryptographic building blocks: password hashing, JWT signing, refresh secrets.

pub mod jwt;
pub mod password;
pub mod refresh;

pub use jwt::{Claims, JwtKeys, TokenError};
pub use password::{PasswordPolicy, PasswordPolicyError, PasswordService};
pub use refresh::RefreshSecret;
