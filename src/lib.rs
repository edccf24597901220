//! LÉA backend: retrieval-augmented question answering over French
//! regulatory texts (CNIL, ANSSI, EUR-Lex), with a correction memory fed by
//! user feedback.

pub mod answer;
pub mod core;
pub mod corrections;
pub mod feedback;
pub mod gateway;
pub mod rag;
pub mod server;
pub mod state;
pub mod vector_math;

#[cfg(test)]
mod test_support;
