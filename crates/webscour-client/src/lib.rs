pub mod fetcher;
pub mod links;
pub mod page_store;

pub use fetcher::{AddressPolicy, ReqwestFetcher};
pub use links::HtmlLinkExtractor;
pub use page_store::FsPageStore;
