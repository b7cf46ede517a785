pub mod pkpd;
pub mod stat;
pub mod util;
pub mod within_host;
