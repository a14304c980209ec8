//! Prompt text for the routed workflow steps.

use crate::state::{SubQuery, SubQueryStatus};
use loresmith_core::retrieval::Passage;

/// Subquery result when retrieval found nothing.
pub const NO_INFORMATION_ANSWER: &str =
    "I couldn't find any relevant information to answer your question.";

/// What the answer prompt allows the model to say when passages don't help.
pub const INSUFFICIENT_ANSWER: &str = "I don't have enough information to answer this question.";

/// Combined answer when the only subquery produced nothing.
pub const EMPTY_SINGLE_ANSWER: &str = "I couldn't find the information to answer your question.";

/// Combined answer when there were no subqueries at all.
pub const NO_SUBQUERIES_ANSWER: &str = "I don't have enough information to answer your question.";

/// Header of the concatenated combination fallback.
pub const COMBINATION_FALLBACK_HEADER: &str = "I found multiple pieces of information:\n\n";

/// Final reply when every recovery path came up empty.
pub const APOLOGY: &str =
    "I'm sorry, I wasn't able to generate a response right now. Please try again.";

pub fn decomposition(query: &str, max_subqueries: usize) -> String {
    let upper = max_subqueries.max(2);
    format!(
        r#"Analyze and decompose this query: "{query}"

First, determine if this is a simple, straightforward question or a complex question with multiple parts.
If it's complex, break it down into 2-{upper} simpler subqueries that together answer the original question.
If it's simple, use the original query as the only subquery.

Output your analysis as JSON:
{{
  "query_type": "simple" or "complex",
  "reasoning": "brief explanation of your decision",
  "subqueries": ["first subquery", "second subquery"]
}}

Provide ONLY the JSON object."#
    )
}

/// Passages rendered as numbered documents.
pub fn documents(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("Document {}:\n{}", i + 1, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn evaluation(query: &str, passages: &[Passage]) -> String {
    format!(
        r#"Evaluate if the following documents contain sufficient information to answer the query.

Query: {query}

Documents:
{docs}

Output your evaluation as JSON:
{{
  "sufficient": true or false,
  "reasoning": "explanation of your decision",
  "missing_information": "what is missing, if insufficient"
}}

Provide ONLY the JSON object, with no text before or after."#,
        docs = documents(passages)
    )
}

pub fn refinement(query: &str, passages: &[Passage], missing_information: &str) -> String {
    let docs = if passages.is_empty() {
        "(no documents were found)".to_string()
    } else {
        documents(passages)
    };
    let hint = if missing_information.trim().is_empty() {
        String::new()
    } else {
        format!("\nMissing information: {}\n", missing_information.trim())
    };
    format!(
        r#"The following query needs to be refined because the retrieved documents don't contain enough information to answer it.

Original query: "{query}"

Retrieved documents (insufficient):
{docs}
{hint}
Write a refined version of the query that is more likely to retrieve relevant information.
Clarify ambiguities, add specific keywords, or reformulate the question.
Output only the refined query text, without explanations or formatting."#
    )
}

pub fn answer(query: &str, passages: &[Passage]) -> String {
    format!(
        r#"Answer the following question using only the provided context. If the context doesn't contain relevant information to answer the question, say "{INSUFFICIENT_ANSWER}"

Question: {query}

Context:
{docs}

Base your answer solely on the context. Do not include information it does not support.
If different documents contain conflicting information, acknowledge this in your answer.

Answer:"#,
        docs = documents(passages)
    )
}

/// `Subquery i: text` plus status and answer, for the combination prompt.
pub fn subquery_results(subqueries: &[SubQuery]) -> String {
    subqueries
        .iter()
        .enumerate()
        .map(|(i, sq)| {
            format!(
                "Subquery {}: {}\nStatus: {}\nAnswer: {}",
                i + 1,
                sq.text,
                sq.status(),
                sq.result
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn combination(original_query: &str, subqueries: &[SubQuery]) -> String {
    format!(
        r#"Combine the following subquery results into a coherent answer to the original question.

ORIGINAL QUESTION: "{original_query}"

SUBQUERY RESULTS:
{results}

Address every aspect of the original question in a well-structured answer.
If subquery results contradict each other, say so explicitly.
Subqueries with status "failed" produced no information; focus on the successful ones.

Your combined answer:"#,
        results = subquery_results(subqueries)
    )
}

/// Concatenation used when the combination call is unusable.
pub fn combination_fallback(subqueries: &[SubQuery]) -> String {
    let entries = subqueries
        .iter()
        .enumerate()
        .map(|(i, sq)| {
            let label = if sq.status() == SubQueryStatus::Failed {
                " (failed)"
            } else {
                ""
            };
            format!("Subquery {}: {}\nAnswer{label}: {}", i + 1, sq.text, sq.result)
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{COMBINATION_FALLBACK_HEADER}{entries}")
}
