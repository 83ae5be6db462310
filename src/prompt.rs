//! Prompt construction. The model only ever sees the file and the current
//! question; earlier turns are not replayed.

use crate::catalog::ModelId;
use crate::constants::{MAX_TOKENS, TEMPERATURE};
use crate::llm_interaction::{ChatMessage, ChatRequest, Role};

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that answers questions based only on provided file content.";

/// The sentence the model is told to use when the file does not hold the answer.
pub const NOT_FOUND_REPLY: &str = "I cannot find this information in the uploaded file";

pub fn user_prompt(file_text: &str, question: &str) -> String {
    format!(
        "Answer the question below using ONLY the content of the uploaded file.\n\
        \n\
        Rules:\n\
        1. Use only information that appears in the file content.\n\
        2. If the file content does not contain the answer, reply with: \"{NOT_FOUND_REPLY}\".\n\
        3. Do not add anything from general knowledge.\n\
        4. Refer to the relevant lines, rows or columns of the file when answering.\n\
        \n\
        FILE CONTENT:\n\
        {file_text}\n\
        \n\
        QUESTION: {question}\n\
        \n\
        Answer based only on the file content above."
    )
}

pub fn build_request(file_text: &str, question: &str, model: ModelId) -> ChatRequest {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: Role::System,
                content: SYSTEM_PROMPT.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: user_prompt(file_text, question),
            },
        ],
        temperature: TEMPERATURE,
        max_tokens: MAX_TOKENS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_file_and_question() {
        let file = "id  total\n 1     40\n 2     17";
        let request = build_request(file, "What is the total for id 2?", ModelId::default());

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[0].content, SYSTEM_PROMPT);

        let user = &request.messages[1];
        assert_eq!(user.role, Role::User);
        assert!(user.content.contains(file));
        assert!(user.content.contains("QUESTION: What is the total for id 2?"));
        assert!(user.content.contains(NOT_FOUND_REPLY));
    }

    #[test]
    fn test_generation_parameters() {
        let request = build_request("x", "y", ModelId::default());
        assert_eq!(request.temperature, TEMPERATURE);
        assert_eq!(request.max_tokens, MAX_TOKENS);
    }

    #[test]
    fn test_model_is_the_only_difference() {
        let a = build_request("file", "question", "llama3-8b-8192".parse().unwrap());
        let b = build_request("file", "question", "mixtral-8x7b-32768".parse().unwrap());
        assert_ne!(a.model, b.model);
        assert_eq!(ChatRequest { model: b.model, ..a.clone() }, b);
    }
}
