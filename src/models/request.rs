use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct UserPath {
    #[validate(length(min = 1, max = 64))]
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SourcePath {
    pub username: String,
    pub kind: String,
}
