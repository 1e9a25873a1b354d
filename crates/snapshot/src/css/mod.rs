mod absolutize;
mod replay;

pub use absolutize::absolutize_urls;
pub use replay::{BuildCache, adapt_css_for_replay};
