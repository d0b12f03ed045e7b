//! Fixed prompt templates for every pipeline.

use crate::prompt::PromptTemplate;

pub const SUPERVISOR_INSTRUCTION: &str = "You are a world-class web research assistant. \
Your task is to perform thorough, unbiased, and up-to-date research on any topic provided by the user. \
Your workflow consists of **five steps**, and you must execute each one **in order**, using the corresponding tool:\n\
1) **Search**: Use `search_tool` to find relevant and credible sources. Return only factual search results.\n\
2) **Synthesize**: Use `synthesizer_tool` to generate a clear, structured, and comprehensive summary of the search results.\n\
3) **Citations**: Use `citation_tool` to format and validate references for the summarized content.\n\
4) **Fact-Check**: Use `fact_checker_tool` to verify key claims and indicate confidence levels.\n\
5) **Bias Analysis**: Use `bias_analyzer_tool` to highlight potential bias or conflicting information.\n\
**Rules:**\n\
- Do **not skip any step**.\n\
- Use the tool explicitly assigned for each step; do not invent steps or tools.\n\
- Cite all sources and indicate confidence levels.\n\
- Clearly state limitations if information is unavailable or uncertain.\n\
- Use concise, professional language and organize output for easy understanding.\n\
When a step is completed, return only the information required for the next tool or the final output. \
Do not generate unrelated content.";

const SEARCH_SYSTEM: &str =
    "You are a search agent. Your task is to gather information from the web.";

/// First research stage: the topic plus results of an up-front web search.
pub fn research_search() -> PromptTemplate {
    PromptTemplate::new()
        .system(SEARCH_SYSTEM)
        .user("Topic: {topic}\nInitial search results:\n{results}")
}

/// Search stage as exposed to the supervisor, which only supplies a query.
pub fn research_search_query() -> PromptTemplate {
    PromptTemplate::new().system(SEARCH_SYSTEM).user("{query}")
}

pub fn research_synthesize() -> PromptTemplate {
    PromptTemplate::new()
        .system(
            "You are a synthesizer agent. Your task is to create a coherent narrative from the \
             search results.",
        )
        .user("Search Results: {search_results}\nUser Query: {user_query}")
}

pub fn research_cite() -> PromptTemplate {
    PromptTemplate::new()
        .system(
            "You are a citation assistant. Your task is to format sources into proper citations.",
        )
        .user("Content: {content}\nSources: {sources}\nStyle: {style}")
}

pub fn research_fact_check() -> PromptTemplate {
    PromptTemplate::new()
        .system(
            "You are a fact-checking assistant. Your task is to verify claims against credible \
             sources.",
        )
        .user("Claims: {claims}\nSources: {sources}")
}

pub fn research_bias_check() -> PromptTemplate {
    PromptTemplate::new()
        .system(
            "You are a bias detection assistant. Your task is to analyze content for potential \
             bias indicators.",
        )
        .user("Content: {content}")
}

const ESSAY_WRITER: &str = "You are a student that writes an essay.";

pub fn essay_generate() -> PromptTemplate {
    PromptTemplate::new()
        .system(ESSAY_WRITER)
        .user("Write an essay on the topic {topic}. The range is 200 - 220 words.")
}

pub fn essay_review() -> PromptTemplate {
    PromptTemplate::new()
        .system("You are a teacher that reviews an essay.")
        .user("Write an review to the following essay: {text}")
}

pub fn essay_improve() -> PromptTemplate {
    PromptTemplate::new()
        .system(ESSAY_WRITER)
        .user("Rewrite following essay: {text} Write it based on following review: {review}")
}

pub fn essay_keywords() -> PromptTemplate {
    PromptTemplate::new()
        .system("You are a student that makes a powerpoint presentation.")
        .user("Write keywords or phrases for powerpoint presentation to the following essay: {text}")
}

/// Per-chunk extraction prompt for scraped pages.
pub fn scrape_extraction() -> PromptTemplate {
    PromptTemplate::new().user(
        "You are tasked with extracting specific information from the following text content: \
         {dom_content}. Please follow these instructions carefully: \n\n\
         1. **Extract Information:** Only extract the information that directly matches the \
         provided description: {parse_description}. \
         2. **No Extra Content:** Do not include any additional text, comments, or explanations \
         in your response. \
         3. **Empty Response:** If no information matches the description, return an empty \
         string ('').\
         4. **Direct Data Only:** Your output should contain only the data that is explicitly \
         requested, with no other text.",
    )
}

/// "Stuff" question answering over retrieved chunks.
pub fn document_answer() -> PromptTemplate {
    PromptTemplate::new()
        .system(
            "Use the following pieces of context to answer the user's question. \n\
             If you don't know the answer, just say that you don't know, don't try to make up \
             an answer.\n----------------\n{context}",
        )
        .user("{question}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_templates_expose_expected_inputs() {
        assert_eq!(research_search().placeholders(), vec!["topic", "results"]);
        assert_eq!(
            research_cite().placeholders(),
            vec!["content", "sources", "style"]
        );
        assert_eq!(research_bias_check().placeholders(), vec!["content"]);
    }

    #[test]
    fn essay_improve_needs_text_and_review() {
        assert_eq!(essay_improve().placeholders(), vec!["text", "review"]);
    }

    #[test]
    fn extraction_and_answer_templates() {
        assert_eq!(
            scrape_extraction().placeholders(),
            vec!["dom_content", "parse_description"]
        );
        assert_eq!(document_answer().placeholders(), vec!["context", "question"]);
    }
}
