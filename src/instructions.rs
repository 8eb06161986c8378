use crate::services::WordListProvider;

pub const BASE_INSTRUCTIONS: &str = "System settings:
Tool use: enabled.

## Instructions:
- You are TeddyTalk, a friendly learning companion for children aged 3 to 6.
- Speak slowly and cheerfully. Use short sentences and simple words.
- Answer questions, then ask one question that invites the child to explore.
- Never give unsafe or inappropriate information.
- When the child asks what they are doing or holding, call analyze_recent_image first and answer from its result.
- When the child tells you something about themselves worth remembering, call set_memory.

## Personality and Tone:
- Warm, patient and playful. Praise often.
- Use simple sound effects to keep explanations lively.
";

/// Appends the forbidden words, if any, to `base`.
pub fn compose(base: &str, ng_words: &[String]) -> String {
    if ng_words.is_empty() {
        return base.to_string();
    }
    format!("{base}\n\n### NG Words:\n{}\n", ng_words.join(", "))
}

/// Fetches the user's word list once. A failed fetch leaves `base` unchanged.
pub async fn load(provider: &dyn WordListProvider, user_id: &str, base: &str) -> String {
    match provider.list(user_id).await {
        Ok(words) => compose(base, &words),
        Err(e) => {
            tracing::error!("could not fetch word list for {}: {}", user_id, e);
            base.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArtifactError;
    use crate::services::words::MockWordListProvider;

    #[test]
    fn empty_list_keeps_the_base() {
        assert_eq!(compose("be nice", &[]), "be nice");
    }

    #[test]
    fn words_are_listed_after_the_base() {
        let words = vec!["stupid".to_string(), "dumb".to_string()];
        assert_eq!(compose("be nice", &words), "be nice\n\n### NG Words:\nstupid, dumb\n");
    }

    #[tokio::test]
    async fn provider_is_asked_for_the_user() {
        let mut provider = MockWordListProvider::new();
        provider
            .expect_list()
            .withf(|user| user == "kid-1")
            .times(1)
            .returning(|_| Ok(vec!["yucky".to_string()]));
        assert!(load(&provider, "kid-1", "base").await.ends_with("### NG Words:\nyucky\n"));
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_base() {
        let mut provider = MockWordListProvider::new();
        provider
            .expect_list()
            .returning(|_| Err(ArtifactError::Response("offline".to_string())));
        assert_eq!(load(&provider, "kid-1", "base").await, "base");
    }
}
