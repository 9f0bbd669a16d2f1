use crate::models::RetrievedChunk;

const INSTRUCTIONS: &str = "You are MediChat Pro, an intelligent medical document assistant.
Based on the following medical documents, provide accurate and helpful answers.
If the information is not in the documents, clearly state that.
When giving medical advice, always remind the user to consult a healthcare professional for an accurate diagnosis and treatment.";

pub fn build_context(retrieved: &[RetrievedChunk]) -> String {
    retrieved
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn compose_prompt(retrieved: &[RetrievedChunk], question: &str) -> String {
    format!(
        "{INSTRUCTIONS}\n\nMedical Documents:\n{context}\n\nUser Question: {question}\n\nAnswer:",
        context = build_context(retrieved),
        question = question.trim(),
    )
}
