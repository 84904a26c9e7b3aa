//! 프롬프트 조립 - 컨텍스트 블록, 시스템 프롬프트, 대화 히스토리

use super::types::RetrievalSource;
use crate::llm::{Message, Role};

/// 프롬프트에 포함할 최근 대화 턴 수
pub const HISTORY_TURNS: usize = 5;

/// 출처를 `[Source N]` 블록으로 나열 (1부터 번호)
pub fn build_context(sources: &[RetrievalSource]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| format!("[Source {}]\n{}", i + 1, source.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn system_prompt(context: &str) -> String {
    format!(
        "You are a helpful AI assistant with access to a knowledge base. \
Answer questions based on the provided context. \
If the context doesn't contain enough information, say so honestly.\n\n\
Context:\n{context}\n\n\
Instructions:\n\
- Answer based on the provided context\n\
- Be concise and accurate\n\
- Cite sources when relevant using [Source N] notation\n\
- If unsure, acknowledge limitations\n\
- Maintain a professional and helpful tone"
    )
}

/// 채팅 메시지 조립
///
/// 시스템 프롬프트 → 최근 히스토리(오래된 순) → 사용자 질의.
/// 히스토리의 user 외 역할은 모두 assistant로 보냅니다.
pub fn build_messages(sources: &[RetrievalSource], history: &[Message], query: &str) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt(&build_context(sources)))];

    let start = history.len().saturating_sub(HISTORY_TURNS);
    messages.extend(history[start..].iter().map(|m| match m.role {
        Role::User => Message::user(m.content.clone()),
        _ => Message::assistant(m.content.clone()),
    }));

    messages.push(Message::user(query));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Metadata;

    fn source(content: &str) -> RetrievalSource {
        RetrievalSource {
            document_id: "doc".to_string(),
            chunk_id: "chunk".to_string(),
            content: content.to_string(),
            score: 0.9,
            metadata: Metadata::new(),
            store: "memory".to_string(),
        }
    }

    #[test]
    fn test_context_numbering() {
        let context = build_context(&[source("first"), source("second")]);
        assert_eq!(context, "[Source 1]\nfirst\n\n[Source 2]\nsecond");
        assert_eq!(build_context(&[]), "");
    }

    #[test]
    fn test_system_prompt_embeds_context() {
        let prompt = system_prompt("[Source 1]\nParis");
        assert!(prompt.contains("Context:\n[Source 1]\nParis\n\nInstructions:"));
        assert!(prompt.contains("[Source N] notation"));
    }

    #[test]
    fn test_history_window_and_order() {
        let history: Vec<Message> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("q{}", i))
                } else {
                    Message::assistant(format!("a{}", i))
                }
            })
            .collect();

        let messages = build_messages(&[], &history, "final question");

        // system + 5 history + query
        assert_eq!(messages.len(), 7);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "a3");
        assert_eq!(messages[5].content, "a7");
        assert_eq!(messages[6].role, Role::User);
        assert_eq!(messages[6].content, "final question");
    }

    #[test]
    fn test_history_roles_normalized() {
        let history = vec![Message::system("old system"), Message::user("hi")];
        let messages = build_messages(&[], &history, "q");

        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "old system");
        assert_eq!(messages[2].role, Role::User);
    }
}
