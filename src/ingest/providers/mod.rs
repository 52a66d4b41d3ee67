pub mod browser;
pub mod browserless;
pub mod github;
pub mod guest_api;
pub mod markdown_table;

pub use browser::{BrowserAdapter, BrowserLauncher, BrowserSession, BrowserSite};
pub use github::{MarkdownFile, MarkdownSource, MarkdownTableAdapter};
pub use guest_api::{GuestApiAdapter, GuestApiConfig};
pub use markdown_table::TableSchema;
