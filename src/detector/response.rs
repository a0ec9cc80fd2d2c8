use crate::utils;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseView {
    pub status: u16,
    pub text: String,
    // Character count of the decoded body.
    pub length: usize,
}

impl ResponseView {
    pub fn new(status: u16, text: impl Into<String>) -> Self {
        let text = text.into();
        let length = text.chars().count();
        Self {
            status,
            text,
            length,
        }
    }

    pub async fn capture(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(Self::new(status, text))
    }

    pub fn excerpt(&self, max_chars: usize) -> String {
        utils::truncate_chars(&self.text, max_chars).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_counts_characters() {
        let view = ResponseView::new(200, "登录成功 ok");
        assert_eq!(view.length, 7);
        assert_eq!(view.excerpt(2), "登录");
        assert_eq!(view.excerpt(100), "登录成功 ok");
    }
}
