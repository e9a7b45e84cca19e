//! Full-text address index over feature names.
//!
//! One Tantivy document per (feature, language, name) search row; house
//! numbers are indexed as names in the default language. The term dictionary
//! serves exact token lookups and prefix completion for the last query token.

use std::{
    ops::ControlFlow,
    path::{Path, PathBuf},
};

use ahash::AHashSet as HashSet;
pub use error::IndexError;
use error::Result;
use geochain_data::{FeatureId, Lang, MapId, SEARCH_ROW_COLUMNS};
use itertools::izip;
use polars::prelude::{DataFrame, DataType, LazyFrame, col};
use serde::{Deserialize, Serialize};
use tantivy::{
    DocAddress, Index, IndexReader, IndexWriter, TantivyDocument, Term,
    collector::DocSetCollector,
    query::{BooleanQuery, Occur, Query, RegexQuery, TermQuery, TermSetQuery},
    schema::{
        FAST, Field, INDEXED, IndexRecordOption, STORED, Schema, SchemaBuilder, TextFieldIndexing,
        TextOptions, Value,
    },
};
use tracing::{debug, info, instrument, trace, warn};

const METADATA_FILE: &str = "geochain_meta.json";

/// Where an address index keeps its segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    InRam,
    /// Parent directory; each map gets its own subdirectory.
    Directory(PathBuf),
}

impl IndexLocation {
    /// Directory under the configured index root (`GEOCHAIN_INDEX_DIR`).
    pub fn default_dir() -> Self {
        Self::Directory(geochain_data::INDEX_DIR.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexMetadata {
    map_id: u32,
    num_docs: usize,
}

/// Token lists to look up in the address index.
#[derive(Debug, Clone)]
pub struct AddressQuery<'a> {
    /// Every group must match; tokens within a group are synonyms. A synonym
    /// of several space-separated words matches names holding all of them.
    pub tokens: &'a [Vec<String>],
    /// Alternatives for the unfinished last token, matched as term prefixes.
    pub prefix_tokens: &'a [String],
    /// Accepted languages; empty accepts all.
    pub langs: &'a HashSet<Lang>,
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    feature_id: Field,
    lang: Field,
    name: Field,
}

impl Fields {
    fn from_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            feature_id: schema.get_field("feature_id")?,
            lang: schema.get_field("lang")?,
            name: schema.get_field("name")?,
        })
    }
}

pub struct AddressIndex {
    map_id: MapId,
    index: Index,
    reader: IndexReader,
    fields: Fields,
}

impl std::fmt::Debug for AddressIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressIndex")
            .field("map_id", &self.map_id)
            .field("num_docs", &self.num_docs())
            .finish()
    }
}

impl AddressIndex {
    fn schema() -> Schema {
        let mut schema_builder = SchemaBuilder::new();
        let name_indexing = TextFieldIndexing::default()
            .set_tokenizer("default")
            .set_index_option(IndexRecordOption::Basic);
        schema_builder.add_u64_field("feature_id", STORED | INDEXED | FAST);
        schema_builder.add_u64_field("lang", STORED | INDEXED);
        schema_builder.add_text_field(
            "name",
            TextOptions::default().set_indexing_options(name_indexing),
        );
        schema_builder.build()
    }

    /// Create or load the address index of one map from its search rows
    /// (`feature_id`, `lang`, `name`).
    ///
    /// A directory index is reused when its metadata names the same map and
    /// document count; otherwise it is rebuilt.
    #[instrument(name = "Create Address Index", skip(data))]
    pub fn new(
        map_id: MapId,
        data: LazyFrame,
        location: IndexLocation,
        overwrite: bool,
    ) -> Result<Self> {
        let rows = data
            .select(SEARCH_ROW_COLUMNS.map(col))
            .collect()?;
        let expected = IndexMetadata {
            map_id: map_id.0,
            num_docs: rows.height(),
        };

        let index = match location {
            IndexLocation::InRam => Self::build(Index::create_in_ram(Self::schema()), rows)?,
            IndexLocation::Directory(root) => {
                let index_path = root.join(format!("map_{}", map_id.0));
                info!(path = ?index_path, "Using address index path.");
                match Self::open_if_current(&index_path, &expected, overwrite) {
                    Some(index) => index,
                    None => {
                        Self::safely_recreate_dir(&index_path)?;
                        let index =
                            Self::build(Index::create_in_dir(&index_path, Self::schema())?, rows)?;
                        std::fs::write(
                            index_path.join(METADATA_FILE),
                            serde_json::to_string_pretty(&expected)?,
                        )?;
                        index
                    }
                }
            }
        };

        let fields = Fields::from_schema(&index.schema())?;
        let reader = index.reader()?;
        Ok(Self {
            map_id,
            index,
            reader,
            fields,
        })
    }

    fn open_if_current(path: &Path, expected: &IndexMetadata, overwrite: bool) -> Option<Index> {
        if overwrite {
            info!(path = ?path, "Overwriting existing index directory.");
            return None;
        }
        if !path.join("meta.json").exists() {
            info!(path = ?path, "No existing index found (meta.json missing). Will create new index.");
            return None;
        }
        let metadata: Option<IndexMetadata> = std::fs::read_to_string(path.join(METADATA_FILE))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok());
        if metadata.as_ref() != Some(expected) {
            info!(path = ?path, ?metadata, ?expected, "Index out of date. Re-indexing.");
            return None;
        }
        match Index::open_in_dir(path) {
            Ok(index) => {
                info!(path = ?path, num_docs = expected.num_docs, "Index is up-to-date. Loaded existing index.");
                Some(index)
            }
            Err(e) => {
                warn!(path = ?path, error = ?e, "Failed to open existing index, will re-index.");
                None
            }
        }
    }

    fn safely_recreate_dir(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn build(index: Index, rows: DataFrame) -> Result<Index> {
        if rows.is_empty() {
            warn!("No search rows to index. Index will be empty.");
            return Ok(index);
        }
        let fields = Fields::from_schema(&index.schema())?;
        let mut writer: IndexWriter = index.writer_with_num_threads(1, 50_000_000)?;
        Self::index_data(&mut writer, &rows, fields)?;
        writer.commit()?;
        info!(num_rows = rows.height(), "Index creation complete");
        Ok(index)
    }

    fn index_data(writer: &mut IndexWriter, df: &DataFrame, fields: Fields) -> Result<()> {
        let ids = df.column("feature_id")?.cast(&DataType::UInt64)?;
        let langs = df.column("lang")?.cast(&DataType::UInt64)?;
        let names = df.column("name")?.str()?;

        for (id, lang, name) in izip!(ids.u64()?, langs.u64()?, names) {
            if let (Some(id), Some(lang), Some(name)) = (id, lang, name) {
                let mut doc = TantivyDocument::default();
                doc.add_u64(fields.feature_id, id);
                doc.add_u64(fields.lang, lang);
                doc.add_text(fields.name, name);
                writer.add_document(doc)?;
            }
        }
        Ok(())
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn build_query(&self, query: &AddressQuery<'_>) -> Result<Option<Box<dyn Query>>> {
        let term = |text: &str| Term::from_field_text(self.fields.name, &text.to_lowercase());

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for group in query.tokens {
            let synonyms: Vec<(Occur, Box<dyn Query>)> = group
                .iter()
                .filter_map(|synonym| {
                    let mut words: Vec<(Occur, Box<dyn Query>)> = synonym
                        .split_whitespace()
                        .map(|word| {
                            let q: Box<dyn Query> =
                                Box::new(TermQuery::new(term(word), IndexRecordOption::Basic));
                            (Occur::Must, q)
                        })
                        .collect();
                    let q: Box<dyn Query> = match words.len() {
                        0 => return None,
                        1 => words.pop()?.1,
                        _ => Box::new(BooleanQuery::new(words)),
                    };
                    Some((Occur::Should, q))
                })
                .collect();
            if !synonyms.is_empty() {
                clauses.push((Occur::Must, Box::new(BooleanQuery::new(synonyms))));
            }
        }

        let mut prefixes: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for prefix in query.prefix_tokens {
            let pattern = format!("{}.*", regex::escape(&prefix.to_lowercase()));
            prefixes.push((
                Occur::Should,
                Box::new(RegexQuery::from_pattern(&pattern, self.fields.name)?),
            ));
        }
        if !prefixes.is_empty() {
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(prefixes))));
        }

        if clauses.is_empty() {
            return Ok(None);
        }
        if !query.langs.is_empty() {
            let langs = query
                .langs
                .iter()
                .map(|&lang| Term::from_field_u64(self.fields.lang, u64::from(lang)));
            clauses.push((Occur::Must, Box::new(TermSetQuery::new(langs))));
        }
        Ok(Some(Box::new(BooleanQuery::new(clauses))))
    }

    /// Visits the id of every matching search row, in index order. Ids repeat
    /// when several names of a feature match. A query without tokens matches
    /// nothing.
    #[instrument(name = "Search Address Index", skip_all, level = "debug", fields(map_id = %self.map_id))]
    pub fn for_each_match(
        &self,
        query: &AddressQuery<'_>,
        mut visit: impl FnMut(FeatureId) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>> {
        let Some(tantivy_query) = self.build_query(query)? else {
            return Ok(ControlFlow::Continue(()));
        };
        trace!(?tantivy_query, "Address query constructed");

        let searcher = self.reader.searcher();
        let mut addresses: Vec<DocAddress> =
            searcher.search(&*tantivy_query, &DocSetCollector)?.into_iter().collect();
        addresses.sort_unstable();
        debug!(num_results = addresses.len(), "Address search complete");

        for address in addresses {
            let doc = searcher.doc::<TantivyDocument>(address)?;
            let id = doc
                .get_first(self.fields.feature_id)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| anyhow::anyhow!("Failed to get feature_id from document: {doc:?}"))?;
            let id = FeatureId::try_from(id)
                .map_err(|_| anyhow::anyhow!("feature_id {id} out of range"))?;
            if visit(id).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum IndexError {
        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
        #[error("Tantivy error: {0}")]
        Tantivy(#[from] tantivy::TantivyError),
        #[error("DataFrame error: {0}")]
        DataFrame(#[from] polars::prelude::PolarsError),
        #[error("Index metadata error: {0}")]
        Metadata(#[from] serde_json::Error),
        #[error(transparent)]
        Other(#[from] anyhow::Error),
    }
    pub type Result<T> = std::result::Result<T, IndexError>;
}

#[cfg(test)]
mod tests {
    use geochain_data::{MapId, search_rows_frame, test_data::TestMapBuilder};
    use polars::prelude::IntoLazy;

    use super::*;

    fn index() -> AddressIndex {
        let map = TestMapBuilder::new(MapId(1))
            .street(1, &[(0.0, 0.0), (100.0, 0.0)], "Main Street")
            .street(2, &[(0.0, 50.0), (100.0, 50.0)], "Mainz Road")
            .poi(3, 10.0, 10.0, "Blue Cafe")
            .building(4, 20.0, 20.0, 5.0, Some("12a"))
            .build();
        let rows = search_rows_frame(&map).unwrap();
        AddressIndex::new(MapId(1), rows.lazy(), IndexLocation::InRam, false).unwrap()
    }

    fn matches(index: &AddressIndex, tokens: &[&[&str]], prefixes: &[&str]) -> Vec<FeatureId> {
        let tokens: Vec<Vec<String>> = tokens
            .iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect();
        let prefixes: Vec<String> = prefixes.iter().map(|s| s.to_string()).collect();
        let langs = HashSet::new();
        let query = AddressQuery {
            tokens: &tokens,
            prefix_tokens: &prefixes,
            langs: &langs,
        };
        let mut ids = Vec::new();
        let flow = index
            .for_each_match(&query, |id| {
                ids.push(id);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(flow, ControlFlow::Continue(()));
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_token_groups_must_all_match() {
        let index = index();
        assert_eq!(index.num_docs(), 4);
        assert_eq!(matches(&index, &[&["main"]], &[]), vec![1]);
        assert_eq!(matches(&index, &[&["main"], &["road"]], &[]), Vec::<FeatureId>::new());
        assert_eq!(matches(&index, &[&["MAIN", "mainz"]], &[]), vec![1, 2]);
    }

    #[test]
    fn test_multi_word_synonym_needs_every_word() {
        let index = index();
        assert_eq!(matches(&index, &[&["ms", "main street"]], &[]), vec![1]);
        // Words spread over different features never combine.
        assert!(matches(&index, &[&["main road"]], &[]).is_empty());
    }

    #[test]
    fn test_prefix_token() {
        let index = index();
        assert_eq!(matches(&index, &[], &["mai"]), vec![1, 2]);
        assert_eq!(matches(&index, &[&["blue"]], &["ca"]), vec![3]);
        assert_eq!(matches(&index, &[], &["12"]), vec![4]);
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let index = index();
        assert!(matches(&index, &[], &[]).is_empty());
    }
}
