//! Base types and utilities for hyper-sdk
#![cfg_attr(hyper_sdk_docsrs, feature(doc_cfg))]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod encoding;
mod key;
mod topic;
mod url;

pub use self::{
    encoding::KeyParsingError,
    key::Key,
    topic::{TOPIC_NAMESPACE, TopicId},
    url::{HyperUrl, URL_PREFIX, URL_SCHEME, UrlError, to_url},
};
