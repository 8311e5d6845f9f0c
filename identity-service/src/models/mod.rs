pub mod otp_challenge;
pub mod session;
pub mod user;

pub use otp_challenge::{OtpChallenge, OtpPurpose};
pub use session::Session;
pub use user::{Role, TokenResponse, User, UserResponse};
