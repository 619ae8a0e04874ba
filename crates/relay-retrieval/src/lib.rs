//! # relay-retrieval
//!
//! The Context Retriever seam: given a query and a result count, return an
//! ordered list of [`ContextSnippet`](relay_core::ContextSnippet)s.
//!
//! [`HttpRetriever`] talks to a search service over HTTP
//! (`POST {query, top_k}`). The order of the response is kept verbatim since
//! it encodes relevance rank.

#![deny(unsafe_code)]

pub mod client;
pub mod errors;

pub use client::{ContextRetriever, HttpRetriever, RetrieverHandle};
pub use errors::RetrievalError;
