//! Prompt construction for the three model roles
//!
//! Every prompt carries the history snapshot of the run, so follow-up
//! questions resolve against earlier answers for the same company.

use crate::memory::format_history;
use crate::models::{CompanyContext, DocumentBundle, Exchange};

const ANALYST_ROLE: &str = "You are a senior financial analyst.";

/// Prompt for the document-analysis model. Documents are attached separately.
pub fn analysis_prompt(bundle: &DocumentBundle, query: &str, history: &[Exchange]) -> String {
    let mut prompt = String::from(ANALYST_ROLE);
    prompt.push_str(
        " Review the attached documents and provide a detailed and structured answer \
         to the user's query.",
    );

    if !bundle.is_empty() {
        prompt.push_str("\n\nAttached documents:\n");
        for doc in bundle.documents() {
            prompt.push_str(&format!("- {} ({}", doc.event_title, doc.kind));
            if let Some(date) = &doc.event_date {
                prompt.push_str(&format!(", {}", date));
            }
            prompt.push_str(")\n");
        }
    }

    push_history(&mut prompt, history);
    prompt.push_str(&format!("\nUser's query: '{}'", query));
    prompt
}

/// Prompt for the live web search model.
pub fn web_search_prompt(company: &CompanyContext, query: &str, history: &[Exchange]) -> String {
    let mut prompt = format!(
        "{} Search the web for the most recent news, market commentary and analyst views on {}",
        ANALYST_ROLE, company.display_name
    );
    if let Some(isin) = &company.isin {
        prompt.push_str(&format!(" (ISIN {})", isin));
    }
    prompt.push_str(
        " that help answer the user's query. Cite the publication and date of every finding.",
    );

    push_history(&mut prompt, history);
    prompt.push_str(&format!("\nUser's query: '{}'", query));
    prompt
}

/// Prompt for the synthesis model.
///
/// With both sources present the answer must attribute each claim; with
/// one source missing it must say which category was unavailable.
pub fn synthesis_prompt(
    analysis: Option<&str>,
    web: Option<&str>,
    query: &str,
    history: &[Exchange],
) -> String {
    let mut prompt = format!(
        "{} Combine the material below into one coherent, well-structured answer \
         to the user's query.",
        ANALYST_ROLE
    );

    match (analysis, web) {
        (Some(_), Some(_)) => prompt.push_str(
            " Attribute each claim to its origin: say \"according to company documents\" or \
             \"according to current web sources\".",
        ),
        (Some(_), None) => prompt.push_str(
            " Current web information was unavailable for this answer; state that clearly and \
             rely only on the company documents.",
        ),
        (None, Some(_)) => prompt.push_str(
            " Company documents were unavailable for this answer; state that clearly and rely \
             only on current web sources.",
        ),
        (None, None) => {}
    }

    if let Some(analysis) = analysis {
        prompt.push_str("\n\n## Company Document Analysis\n");
        prompt.push_str(analysis);
    }
    if let Some(web) = web {
        prompt.push_str("\n\n## Current Web Findings\n");
        prompt.push_str(web);
    }

    push_history(&mut prompt, history);
    prompt.push_str(&format!("\nUser's query: '{}'", query));
    prompt
}

fn push_history(prompt: &mut String, history: &[Exchange]) {
    if history.is_empty() {
        return;
    }
    prompt.push_str("\n\n");
    prompt.push_str(&format_history(history));
}
