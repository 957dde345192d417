pub mod extractor;
pub mod fetcher;
pub mod verifier;

pub use extractor::HtmlExtractor;
pub use fetcher::ReqwestFetcher;
pub use verifier::OpenAiVerifier;
