pub mod schema;
pub mod validator;

pub use schema::FeedbackResult;
pub use validator::ResponseValidator;
