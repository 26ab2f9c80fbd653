use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use n0_future::boxed::BoxFuture;

use crate::dns::{DnsError, DnsOptions, DnsTransport, TxtAnswer, dnslink::dnslink_name};

/// A [`DnsTransport`] answering from a fixed table.
///
/// Unknown names have no records. Clones share the table.
#[derive(Debug, Clone, Default)]
pub struct StaticDns {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<String, Vec<TxtAnswer>>,
    queries: Vec<String>,
    options: Vec<DnsOptions>,
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl StaticDns {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TXT answers for `name`.
    pub fn insert(&self, name: impl AsRef<str>, answers: Vec<TxtAnswer>) {
        self.state
            .lock()
            .expect("poisoned")
            .records
            .insert(normalize(name.as_ref()), answers);
    }

    /// Publishes a DNS-link record with the value `value` for `domain`.
    pub fn with_dnslink(self, domain: &str, value: &str) -> Self {
        self.insert(dnslink_name(domain), vec![TxtAnswer::from(value)]);
        self
    }

    /// Returns the names queried so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.lock().expect("poisoned").queries.clone()
    }

    /// Returns the options of the last query.
    pub fn last_options(&self) -> Option<DnsOptions> {
        self.state.lock().expect("poisoned").options.last().cloned()
    }
}

impl DnsTransport for StaticDns {
    fn query_txt(
        &self,
        name: String,
        options: DnsOptions,
    ) -> BoxFuture<Result<Vec<TxtAnswer>, DnsError>> {
        let mut state = self.state.lock().expect("poisoned");
        let name = normalize(&name);
        let answers = state.records.get(&name).cloned().unwrap_or_default();
        state.queries.push(name);
        state.options.push(options);
        Box::pin(async move { Ok(answers) })
    }
}
