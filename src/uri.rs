//! Request URI assembly.

use std::collections::BTreeMap;

use url::Url;

/// Builds the URI of a single request from connection and command state.
#[derive(Debug, Clone)]
pub struct UriBuilder {
    base: Url,
    database: String,
    session_id: Option<String>,
    compression: bool,
    settings: BTreeMap<String, String>,
    sql: Option<String>,
    query_parameters: Vec<(String, String)>,
    query_id: Option<String>,
}

impl UriBuilder {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            database: "default".to_string(),
            session_id: None,
            compression: false,
            settings: BTreeMap::new(),
            sql: None,
            query_parameters: Vec::new(),
            query_id: None,
        }
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Server settings, sent under their own names.
    pub fn settings(mut self, settings: BTreeMap<String, String>) -> Self {
        self.settings = settings;
        self
    }

    /// SQL to send in the `query` argument rather than the body.
    pub fn sql(mut self, sql: Option<String>) -> Self {
        self.sql = sql;
        self
    }

    pub fn query_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_parameters.push((name.into(), value.into()));
        self
    }

    pub fn query_parameters(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query_parameters.extend(params);
        self
    }

    pub fn query_id(mut self, query_id: Option<String>) -> Self {
        self.query_id = query_id.filter(|id| !id.is_empty());
        self
    }

    pub fn build(&self) -> Url {
        let mut url = self.base.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("database", &self.database);
            if let Some(session) = &self.session_id {
                pairs.append_pair("session_id", session);
            }
            pairs.append_pair(
                "enable_http_compression",
                if self.compression { "true" } else { "false" },
            );
            if let Some(sql) = &self.sql {
                pairs.append_pair("query", sql);
            }
            for (name, value) in &self.query_parameters {
                pairs.append_pair(name, value);
            }
            for (name, value) in &self.settings {
                pairs.append_pair(name, value);
            }
            if let Some(id) = &self.query_id {
                pairs.append_pair("query_id", id);
            }
        }
        url
    }
}
