pub mod scrapfly;
pub mod seloger;

pub use scrapfly::ScrapflyClient;
pub use seloger::SeLogerSource;
