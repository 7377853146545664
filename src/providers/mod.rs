mod traits;
mod xero;

pub use traits::{OAuthProvider, TenantReference, TokenSet};
pub use xero::XeroProvider;
