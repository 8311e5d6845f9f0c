pub mod email;
pub mod otp;
pub mod session;
pub mod token;

pub use email::{EmailProvider, LogMailer, SmtpMailer};
pub use otp::{OtpConfig, OtpEngine, OtpTicket, VerifyOutcome};
pub use session::SessionManager;
pub use token::{AccessTokenClaims, RefreshTokenClaims, TokenService};
