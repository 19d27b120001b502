//! Vector Store (component C5): one LanceDB connection holding five
//! tables — `code_search` (vectors + FTS), `metadata`, `dependencies`,
//! `watch_list`, `chat_messages`. Grounded in `storage::lance`'s
//! table-creation-on-first-insert, filter-escaping, and IVF-PQ/compaction
//! idioms, generalized to the full schema and to hybrid search.

use std::collections::HashSet;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, BooleanArray, FixedSizeListArray, Float32Array, RecordBatch,
    RecordBatchIterator, StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use futures::TryStreamExt;
use lancedb::{
    connect,
    index::Index,
    query::{ExecutableQuery, QueryBase},
    table::OptimizeAction,
    Connection, DistanceType, Table,
};

use crate::error::StoreError;
use crate::models::{ChurnLevel, DependencyRecord, ImportEdge, RankedResult, VectorRecord, WatchListEntry};

type Result<T> = std::result::Result<T, StoreError>;

const CODE_SEARCH_TABLE: &str = "code_search";
const METADATA_TABLE: &str = "metadata";
const DEPENDENCIES_TABLE: &str = "dependencies";
const WATCH_LIST_TABLE: &str = "watch_list";
const CHAT_MESSAGES_TABLE: &str = "chat_messages";

/// Escape a string value for use in a DataFusion SQL filter expression.
/// Doubles single quotes and strips null bytes to prevent injection.
pub fn escape_filter_string(s: &str) -> String {
    s.replace('\0', "").replace('\'', "''")
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub collection: Option<String>,
    pub project_name: Option<String>,
    pub categories: Vec<String>,
    pub authors: Vec<String>,
    pub churn_levels: Vec<ChurnLevel>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub file_types: Vec<String>,
}

impl SearchFilter {
    /// Build the DataFusion WHERE clause for every pre-filterable column.
    /// `file_types` is deliberately excluded — it's a post-filter per
    /// SPEC_FULL §4.5.
    fn to_where_clause(&self) -> Option<String> {
        let mut clauses = Vec::new();
        if let Some(c) = &self.collection {
            clauses.push(format!("collection = '{}'", escape_filter_string(c)));
        }
        if let Some(p) = &self.project_name {
            clauses.push(format!("projectname = '{}'", escape_filter_string(p)));
        }
        if !self.categories.is_empty() {
            let inner = self
                .categories
                .iter()
                .map(|c| format!("'{}'", escape_filter_string(c)))
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("category IN ({inner})"));
        }
        if !self.authors.is_empty() {
            let inner = self
                .authors
                .iter()
                .map(|a| format!("'{}'", escape_filter_string(a)))
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("last_commit_author IN ({inner})"));
        }
        if !self.churn_levels.is_empty() {
            let inner = self
                .churn_levels
                .iter()
                .map(|c| format!("'{}'", c.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("churn_level IN ({inner})"));
        }
        if let Some(from) = &self.date_from {
            clauses.push(format!("last_commit_date >= '{}'", escape_filter_string(from)));
        }
        if let Some(to) = &self.date_to {
            clauses.push(format!("last_commit_date <= '{}'", escape_filter_string(to)));
        }
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }

    fn passes_file_type(&self, file_path: &str) -> bool {
        if self.file_types.is_empty() {
            return true;
        }
        let lower = file_path.to_lowercase();
        self.file_types
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()))
    }
}

pub struct VectorStore {
    db: Connection,
    vector_dim: i32,
    code_search: Option<Table>,
    metadata: Option<Table>,
    dependencies: Option<Table>,
    watch_list: Option<Table>,
    chat_messages: Option<Table>,
}

impl VectorStore {
    pub async fn open(db_path: &str, vector_dim: usize) -> Result<Self> {
        std::fs::create_dir_all(db_path).map_err(|e| StoreError::Other(e.to_string()))?;
        let db = connect(db_path).execute().await?;

        let mut store = Self {
            db,
            vector_dim: vector_dim as i32,
            code_search: None,
            metadata: None,
            dependencies: None,
            watch_list: None,
            chat_messages: None,
        };
        store.open_existing_tables().await?;
        Ok(store)
    }

    async fn open_existing_tables(&mut self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&CODE_SEARCH_TABLE.to_string()) {
            self.code_search = Some(self.db.open_table(CODE_SEARCH_TABLE).execute().await?);
        }
        if names.contains(&METADATA_TABLE.to_string()) {
            self.metadata = Some(self.db.open_table(METADATA_TABLE).execute().await?);
        }
        if names.contains(&DEPENDENCIES_TABLE.to_string()) {
            self.dependencies = Some(self.db.open_table(DEPENDENCIES_TABLE).execute().await?);
        }
        if names.contains(&WATCH_LIST_TABLE.to_string()) {
            self.watch_list = Some(self.db.open_table(WATCH_LIST_TABLE).execute().await?);
        }
        if names.contains(&CHAT_MESSAGES_TABLE.to_string()) {
            self.chat_messages = Some(self.db.open_table(CHAT_MESSAGES_TABLE).execute().await?);
        }
        Ok(())
    }

    fn code_search_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("collection", DataType::Utf8, false),
            Field::new("projectname", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("type", DataType::Utf8, false),
            Field::new("category", DataType::Utf8, false),
            Field::new("filepath", DataType::Utf8, false),
            Field::new("startline", DataType::UInt32, false),
            Field::new("endline", DataType::UInt32, false),
            Field::new("comments", DataType::Utf8, true),
            Field::new("content", DataType::Utf8, false),
            Field::new("summary", DataType::Utf8, true),
            Field::new("file_hash", DataType::Utf8, false),
            Field::new("last_commit_author", DataType::Utf8, true),
            Field::new("last_commit_email", DataType::Utf8, true),
            Field::new("last_commit_date", DataType::Utf8, true),
            Field::new("last_commit_hash", DataType::Utf8, true),
            Field::new("last_commit_message", DataType::Utf8, true),
            Field::new("churn_level", DataType::Utf8, true),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.vector_dim,
                ),
                false,
            ),
        ]))
    }

    // ---------------------------------------------------------------
    // metadata / stored-model invariant
    // ---------------------------------------------------------------

    pub async fn stored_model(&self) -> Result<Option<String>> {
        let Some(table) = &self.metadata else {
            return Ok(None);
        };
        let batches = table
            .query()
            .limit(1)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        for batch in batches {
            if let Some(col) = batch
                .column_by_name("model_name")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            {
                if col.len() > 0 {
                    return Ok(Some(col.value(0).to_string()));
                }
            }
        }
        Ok(None)
    }

    async fn ensure_model(&mut self, current_model: &str) -> Result<()> {
        if let Some(stored) = self.stored_model().await? {
            if stored != current_model {
                return Err(StoreError::ModelMismatch {
                    stored,
                    current: current_model.to_string(),
                });
            }
            return Ok(());
        }

        let schema = Arc::new(Schema::new(vec![Field::new(
            "model_name",
            DataType::Utf8,
            false,
        )]));
        let model_names: ArrayRef = Arc::new(StringArray::from(vec![current_model.to_string()]));
        let batch = RecordBatch::try_new(schema.clone(), vec![model_names])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        let table = self
            .db
            .create_table(METADATA_TABLE, Box::new(batches))
            .execute()
            .await?;
        self.metadata = Some(table);
        Ok(())
    }

    // ---------------------------------------------------------------
    // code_search
    // ---------------------------------------------------------------

    /// Insert records written with `current_model`. Rejects the write
    /// (leaving the store unchanged) if a different model already wrote
    /// to this store.
    pub async fn insert(&mut self, records: &[VectorRecord], current_model: &str) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_model(current_model).await?;

        let schema = self.code_search_schema();
        let collection: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.collection.as_str()).collect::<Vec<_>>(),
        ));
        let project: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.project_name.as_str()).collect::<Vec<_>>(),
        ));
        let name: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
        ));
        let rtype: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.r#type.as_str()).collect::<Vec<_>>(),
        ));
        let category: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.category.as_str()).collect::<Vec<_>>(),
        ));
        let filepath: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.file_path.as_str()).collect::<Vec<_>>(),
        ));
        let startline: ArrayRef = Arc::new(UInt32Array::from(
            records.iter().map(|r| r.start_line).collect::<Vec<_>>(),
        ));
        let endline: ArrayRef = Arc::new(UInt32Array::from(
            records.iter().map(|r| r.end_line).collect::<Vec<_>>(),
        ));
        let comments: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| Some(r.comments.as_str())).collect::<Vec<_>>(),
        ));
        let content: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.content.as_str()).collect::<Vec<_>>(),
        ));
        let summary: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.summary.as_deref()).collect::<Vec<_>>(),
        ));
        let file_hash: ArrayRef = Arc::new(StringArray::from(
            records.iter().map(|r| r.file_hash.as_str()).collect::<Vec<_>>(),
        ));
        let last_author: ArrayRef = Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.git.last_commit_author.as_deref())
                .collect::<Vec<_>>(),
        ));
        let last_email: ArrayRef = Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.git.last_commit_email.as_deref())
                .collect::<Vec<_>>(),
        ));
        let last_date: ArrayRef = Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.git.last_commit_date.as_deref())
                .collect::<Vec<_>>(),
        ));
        let last_hash: ArrayRef = Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.git.last_commit_hash.as_deref())
                .collect::<Vec<_>>(),
        ));
        let last_message: ArrayRef = Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.git.last_commit_message.as_deref())
                .collect::<Vec<_>>(),
        ));
        let churn: ArrayRef = Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.git.churn_level.map(|c| c.as_str()))
                .collect::<Vec<_>>(),
        ));

        let flat_vectors: Vec<f32> = records.iter().flat_map(|r| r.vector.iter().copied()).collect();
        let values_array = Float32Array::from(flat_vectors);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector: ArrayRef = Arc::new(FixedSizeListArray::new(
            field,
            self.vector_dim,
            Arc::new(values_array),
            None,
        ));

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                collection, project, name, rtype, category, filepath, startline, endline,
                comments, content, summary, file_hash, last_author, last_email, last_date,
                last_hash, last_message, churn, vector,
            ],
        )?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if let Some(table) = &mut self.code_search {
            let unique_paths: HashSet<&str> = records.iter().map(|r| r.file_path.as_str()).collect();
            if !unique_paths.is_empty() {
                let filter = unique_paths
                    .iter()
                    .map(|p| format!("filepath = '{}'", escape_filter_string(p)))
                    .collect::<Vec<_>>()
                    .join(" OR ");
                let _ = table.delete(&filter).await;
            }
            table.add(Box::new(batches)).execute().await?;
        } else {
            let table = self
                .db
                .create_table(CODE_SEARCH_TABLE, Box::new(batches))
                .execute()
                .await?;
            self.code_search = Some(table);
        }
        Ok(())
    }

    /// Pure ANN search with pre-filters, post-sliced to `limit`.
    pub async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        let Some(table) = &self.code_search else {
            return Ok(Vec::new());
        };
        let fetch_limit = limit * 5;
        let mut query = table.query().nearest_to(embedding)?.limit(fetch_limit);
        if let Some(where_clause) = filter.to_where_clause() {
            query = query.only_if(where_clause);
        }
        let batches = query.execute().await?.try_collect::<Vec<_>>().await?;
        let mut hits = rows_from_batches(&batches, true);
        hits.retain(|(r, _)| filter.passes_file_type(&r.file_path));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Full-text search over `content`, pre-filtered the same way as
    /// [`VectorStore::search`].
    pub async fn fts_search(
        &self,
        query_text: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        let Some(table) = &self.code_search else {
            return Ok(Vec::new());
        };
        let escaped = escape_filter_string(query_text);
        let mut full_text_query = table.query().full_text_search(
            lancedb::query::FullTextSearchQuery::new(escaped),
        );
        full_text_query = full_text_query.limit(limit);
        if let Some(where_clause) = filter.to_where_clause() {
            full_text_query = full_text_query.only_if(where_clause);
        }
        let batches = match full_text_query.execute().await {
            Ok(stream) => stream.try_collect::<Vec<_>>().await?,
            Err(e) => {
                tracing::warn!("fts query failed (index may not exist yet): {}", e);
                return Ok(Vec::new());
            }
        };
        let mut hits = rows_from_batches(&batches, false);
        hits.retain(|(r, _)| filter.passes_file_type(&r.file_path));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Union of ANN and FTS search, deduplicated by `(filepath, startline,
    /// name)` with FTS results listed first (I-DEDUP, I-HYBRID-SUPERSET).
    pub async fn hybrid_search(
        &self,
        query_text: &str,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RankedResult>> {
        let fetch = limit * 2;
        let fts = self.fts_search(query_text, fetch, filter).await.unwrap_or_default();
        let ann = self.search(embedding, fetch, filter).await?;

        let mut seen: HashSet<(String, u32, String)> = HashSet::new();
        let mut merged = Vec::new();
        for (record, score) in fts.into_iter().chain(ann.into_iter()) {
            let key = (record.file_path.clone(), record.start_line, record.name.clone());
            if seen.insert(key) {
                merged.push(RankedResult {
                    file_path: record.file_path,
                    name: record.name,
                    r#type: record.r#type,
                    start_line: record.start_line,
                    end_line: record.end_line,
                    content: record.content,
                    summary: record.summary,
                    score,
                    rerank_score: None,
                });
            }
        }
        merged.truncate(limit);
        Ok(merged)
    }

    pub async fn delete_by_file(&mut self, file_path: &str) -> Result<()> {
        if let Some(table) = &self.code_search {
            table
                .delete(&format!("filepath = '{}'", escape_filter_string(file_path)))
                .await?;
        }
        if let Some(table) = &self.dependencies {
            let _ = table
                .delete(&format!("filepath = '{}'", escape_filter_string(file_path)))
                .await;
        }
        Ok(())
    }

    pub async fn delete_by_project(&mut self, project_name: &str) -> Result<()> {
        if let Some(table) = &self.code_search {
            table
                .delete(&format!("projectname = '{}'", escape_filter_string(project_name)))
                .await?;
        }
        if let Some(table) = &self.dependencies {
            let _ = table
                .delete(&format!("projectname = '{}'", escape_filter_string(project_name)))
                .await;
        }
        Ok(())
    }

    pub async fn clear(&mut self) -> Result<()> {
        for name in [
            CODE_SEARCH_TABLE,
            METADATA_TABLE,
            DEPENDENCIES_TABLE,
            WATCH_LIST_TABLE,
            CHAT_MESSAGES_TABLE,
        ] {
            let _ = self.db.drop_table(name).await;
        }
        self.code_search = None;
        self.metadata = None;
        self.dependencies = None;
        self.watch_list = None;
        self.chat_messages = None;
        Ok(())
    }

    pub async fn move_project_to_collection(&mut self, project_name: &str, new_collection: &str) -> Result<()> {
        if let Some(table) = &self.code_search {
            table
                .update()
                .only_if(format!("projectname = '{}'", escape_filter_string(project_name)))
                .column("collection", format!("'{}'", escape_filter_string(new_collection)))
                .execute()
                .await?;
        }
        if let Some(table) = &self.dependencies {
            let _ = table
                .update()
                .only_if(format!("projectname = '{}'", escape_filter_string(project_name)))
                .column("collection", format!("'{}'", escape_filter_string(new_collection)))
                .execute()
                .await;
        }
        Ok(())
    }

    /// Distinct known file paths and their current fingerprint, recovered
    /// from `code_search` rows rather than a side file (SPEC_FULL §4.2).
    pub async fn file_hashes(&self, project_name: &str) -> Result<Vec<(String, String)>> {
        let Some(table) = &self.code_search else {
            return Ok(Vec::new());
        };
        let batches = table
            .query()
            .only_if(format!("projectname = '{}'", escape_filter_string(project_name)))
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        let mut seen = std::collections::HashMap::new();
        for batch in batches {
            let paths = batch.column_by_name("filepath").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let hashes = batch.column_by_name("file_hash").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            if let (Some(paths), Some(hashes)) = (paths, hashes) {
                for i in 0..batch.num_rows() {
                    seen.insert(paths.value(i).to_string(), hashes.value(i).to_string());
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    // ---------------------------------------------------------------
    // dependencies
    // ---------------------------------------------------------------

    fn dependencies_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("filepath", DataType::Utf8, false),
            Field::new("projectname", DataType::Utf8, false),
            Field::new("collection", DataType::Utf8, false),
            Field::new("imports_json", DataType::Utf8, false),
            Field::new("exports_json", DataType::Utf8, false),
        ]))
    }

    pub async fn upsert_dependency(&mut self, record: &DependencyRecord) -> Result<()> {
        let schema = Self::dependencies_schema();
        let imports_json = serde_json::to_string(&record.imports).unwrap_or_else(|_| "[]".to_string());
        let exports_json = serde_json::to_string(&record.exports).unwrap_or_else(|_| "[]".to_string());

        let filepath: ArrayRef = Arc::new(StringArray::from(vec![record.file_path.clone()]));
        let project: ArrayRef = Arc::new(StringArray::from(vec![record.project_name.clone()]));
        let collection: ArrayRef = Arc::new(StringArray::from(vec![record.collection.clone()]));
        let imports: ArrayRef = Arc::new(StringArray::from(vec![imports_json]));
        let exports: ArrayRef = Arc::new(StringArray::from(vec![exports_json]));
        let batch = RecordBatch::try_new(schema.clone(), vec![filepath, project, collection, imports, exports])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if let Some(table) = &mut self.dependencies {
            table
                .delete(&format!("filepath = '{}'", escape_filter_string(&record.file_path)))
                .await?;
            table.add(Box::new(batches)).execute().await?;
        } else {
            // Single-flight create: a racing second writer retries as an
            // add against the table the first writer just created.
            match self
                .db
                .create_table(DEPENDENCIES_TABLE, Box::new(batches))
                .execute()
                .await
            {
                Ok(table) => self.dependencies = Some(table),
                Err(_) => {
                    let table = self.db.open_table(DEPENDENCIES_TABLE).execute().await?;
                    self.dependencies = Some(table);
                }
            }
        }
        Ok(())
    }

    pub async fn get_dependency(&self, file_path: &str) -> Result<Option<DependencyRecord>> {
        let Some(table) = &self.dependencies else {
            return Ok(None);
        };
        let batches = table
            .query()
            .only_if(format!("filepath = '{}'", escape_filter_string(file_path)))
            .limit(1)
            .execute()
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        for batch in batches {
            if batch.num_rows() == 0 {
                continue;
            }
            let project = col_str(&batch, "projectname", 0);
            let collection = col_str(&batch, "collection", 0);
            let imports_json = col_str(&batch, "imports_json", 0);
            let exports_json = col_str(&batch, "exports_json", 0);
            let imports: Vec<ImportEdge> = serde_json::from_str(&imports_json).unwrap_or_default();
            let exports: Vec<String> = serde_json::from_str(&exports_json).unwrap_or_default();
            return Ok(Some(DependencyRecord {
                file_path: file_path.to_string(),
                project_name: project,
                collection,
                imports,
                exports,
            }));
        }
        Ok(None)
    }

    // ---------------------------------------------------------------
    // watch_list
    // ---------------------------------------------------------------

    fn watch_list_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("folderpath", DataType::Utf8, false),
            Field::new("projectname", DataType::Utf8, false),
            Field::new("collection", DataType::Utf8, false),
        ]))
    }

    pub async fn add_watch(&mut self, entry: &WatchListEntry) -> Result<()> {
        let schema = Self::watch_list_schema();
        let folder: ArrayRef = Arc::new(StringArray::from(vec![entry.folder_path.clone()]));
        let project: ArrayRef = Arc::new(StringArray::from(vec![entry.project_name.clone()]));
        let collection: ArrayRef = Arc::new(StringArray::from(vec![entry.collection.clone()]));
        let batch = RecordBatch::try_new(schema.clone(), vec![folder, project, collection])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if let Some(table) = &mut self.watch_list {
            table
                .delete(&format!("folderpath = '{}'", escape_filter_string(&entry.folder_path)))
                .await?;
            table.add(Box::new(batches)).execute().await?;
        } else {
            let table = self.db.create_table(WATCH_LIST_TABLE, Box::new(batches)).execute().await?;
            self.watch_list = Some(table);
        }
        Ok(())
    }

    pub async fn remove_watch(&mut self, folder_path: &str) -> Result<()> {
        if let Some(table) = &self.watch_list {
            table
                .delete(&format!("folderpath = '{}'", escape_filter_string(folder_path)))
                .await?;
        }
        Ok(())
    }

    pub async fn list_watches(&self) -> Result<Vec<WatchListEntry>> {
        let Some(table) = &self.watch_list else {
            return Ok(Vec::new());
        };
        let batches = table.query().execute().await?.try_collect::<Vec<_>>().await?;
        let mut entries = Vec::new();
        for batch in batches {
            for i in 0..batch.num_rows() {
                entries.push(WatchListEntry {
                    folder_path: col_str(&batch, "folderpath", i),
                    project_name: col_str(&batch, "projectname", i),
                    collection: col_str(&batch, "collection", i),
                });
            }
        }
        Ok(entries)
    }

    /// Distinct `(collection, projectname)` pairs, grouped by collection,
    /// for `list_knowledge_base` (SPEC_FULL §6).
    pub async fn list_projects(&self) -> Result<std::collections::BTreeMap<String, Vec<String>>> {
        let mut out: std::collections::BTreeMap<String, std::collections::BTreeSet<String>> =
            std::collections::BTreeMap::new();
        let Some(table) = &self.code_search else {
            return Ok(std::collections::BTreeMap::new());
        };
        let batches = table.query().execute().await?.try_collect::<Vec<_>>().await?;
        for batch in batches {
            for i in 0..batch.num_rows() {
                let collection = col_str(&batch, "collection", i);
                let project = col_str(&batch, "projectname", i);
                out.entry(collection).or_default().insert(project);
            }
        }
        Ok(out
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect())
    }

    /// All dependency records, for `find_symbol_usages` (SPEC_FULL §6)
    /// scanning every file's imports/exports for a symbol.
    pub async fn list_dependencies(&self) -> Result<Vec<DependencyRecord>> {
        let Some(table) = &self.dependencies else {
            return Ok(Vec::new());
        };
        let batches = table.query().execute().await?.try_collect::<Vec<_>>().await?;
        let mut out = Vec::new();
        for batch in batches {
            for i in 0..batch.num_rows() {
                let imports_json = col_str(&batch, "imports_json", i);
                let exports_json = col_str(&batch, "exports_json", i);
                out.push(DependencyRecord {
                    file_path: col_str(&batch, "filepath", i),
                    project_name: col_str(&batch, "projectname", i),
                    collection: col_str(&batch, "collection", i),
                    imports: serde_json::from_str(&imports_json).unwrap_or_default(),
                    exports: serde_json::from_str(&exports_json).unwrap_or_default(),
                });
            }
        }
        Ok(out)
    }

    /// Reads the raw content of a line range from the file on disk
    /// (1-based, inclusive) for `read_code_range` (SPEC_FULL §6).
    pub async fn read_code_range(file_path: &str, start_line: u32, end_line: u32) -> std::io::Result<String> {
        let content = tokio::fs::read_to_string(file_path).await?;
        let start = start_line.max(1) as usize - 1;
        let end = (end_line as usize).min(content.lines().count());
        Ok(content
            .lines()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    // ---------------------------------------------------------------
    // chat_messages
    // ---------------------------------------------------------------

    fn chat_messages_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("role", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("timestamp", DataType::Utf8, false),
        ]))
    }

    pub async fn append_chat_message(&mut self, role: &str, content: &str, timestamp: &str) -> Result<()> {
        let schema = Self::chat_messages_schema();
        let role_arr: ArrayRef = Arc::new(StringArray::from(vec![role.to_string()]));
        let content_arr: ArrayRef = Arc::new(StringArray::from(vec![content.to_string()]));
        let ts_arr: ArrayRef = Arc::new(StringArray::from(vec![timestamp.to_string()]));
        let batch = RecordBatch::try_new(schema.clone(), vec![role_arr, content_arr, ts_arr])?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if let Some(table) = &mut self.chat_messages {
            table.add(Box::new(batches)).execute().await?;
        } else {
            let table = self
                .db
                .create_table(CHAT_MESSAGES_TABLE, Box::new(batches))
                .execute()
                .await?;
            self.chat_messages = Some(table);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Index maintenance
    // ---------------------------------------------------------------

    /// Create (or skip, if growth since last build is < 20%) an IVF-PQ
    /// vector index plus the native FTS index on `content`.
    pub async fn build_indexes(&self, last_indexed_rows: Option<usize>) -> Result<Option<usize>> {
        let Some(table) = &self.code_search else {
            return Ok(None);
        };
        let row_count = table.count_rows(None).await?;
        if row_count < 256 {
            return Ok(last_indexed_rows);
        }
        if let Some(last) = last_indexed_rows {
            if last > 0 {
                let growth = (row_count as f64 - last as f64) / last as f64;
                if growth < 0.20 {
                    return Ok(last_indexed_rows);
                }
            }
        }

        let num_partitions = ((row_count as f64).sqrt() as u32).clamp(4, 256);
        let index = lancedb::index::vector::IvfPqIndexBuilder::default()
            .distance_type(DistanceType::Cosine)
            .num_partitions(num_partitions)
            .num_sub_vectors(16);
        table.create_index(&["vector"], Index::IvfPq(index)).execute().await?;

        if let Err(e) = table
            .create_index(&["content"], Index::FTS(Default::default()))
            .execute()
            .await
        {
            tracing::warn!("failed to build FTS index on content: {}", e);
        }

        Ok(Some(row_count))
    }

    pub async fn compact(&self) -> Result<()> {
        if let Some(table) = &self.code_search {
            let stats = table.optimize(OptimizeAction::All).await?;
            tracing::info!(
                "vector store compaction: {} fragments removed",
                stats.compaction.as_ref().map(|c| c.fragments_removed).unwrap_or(0)
            );
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        match &self.code_search {
            Some(table) => Ok(table.count_rows(None).await?),
            None => Ok(0),
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        let _ = self.count().await?;
        Ok(())
    }
}

fn col_str(batch: &RecordBatch, name: &str, row: usize) -> String {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map(|c| c.value(row).to_string())
        .unwrap_or_default()
}

fn rows_from_batches(batches: &[RecordBatch], has_distance: bool) -> Vec<(VectorRecord, f32)> {
    let mut rows = Vec::new();
    for batch in batches {
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());
        let relevance = batch
            .column_by_name("_relevance_score")
            .or_else(|| batch.column_by_name("_score"))
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        for i in 0..batch.num_rows() {
            let score = if has_distance {
                distances.map(|d| 1.0 / (1.0 + d.value(i))).unwrap_or(0.0)
            } else {
                relevance.map(|r| r.value(i)).unwrap_or(1.0)
            };

            let churn = col_str(batch, "churn_level", i);
            let git = crate::models::record::GitEnrichment {
                last_commit_author: non_empty(col_str(batch, "last_commit_author", i)),
                last_commit_email: non_empty(col_str(batch, "last_commit_email", i)),
                last_commit_date: non_empty(col_str(batch, "last_commit_date", i)),
                last_commit_hash: non_empty(col_str(batch, "last_commit_hash", i)),
                last_commit_message: non_empty(col_str(batch, "last_commit_message", i)),
                commit_count_window: None,
                churn_level: match churn.as_str() {
                    "low" => Some(ChurnLevel::Low),
                    "medium" => Some(ChurnLevel::Medium),
                    "high" => Some(ChurnLevel::High),
                    _ => None,
                },
            };

            let record = VectorRecord {
                collection: col_str(batch, "collection", i),
                project_name: col_str(batch, "projectname", i),
                name: col_str(batch, "name", i),
                r#type: col_str(batch, "type", i),
                category: col_str(batch, "category", i),
                file_path: col_str(batch, "filepath", i),
                start_line: batch
                    .column_by_name("startline")
                    .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
                    .map(|c| c.value(i))
                    .unwrap_or(0),
                end_line: batch
                    .column_by_name("endline")
                    .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
                    .map(|c| c.value(i))
                    .unwrap_or(0),
                comments: col_str(batch, "comments", i),
                content: col_str(batch, "content", i),
                summary: non_empty(col_str(batch, "summary", i)),
                file_hash: col_str(batch, "file_hash", i),
                vector: Vec::new(),
                git,
            };
            rows.push((record, score));
        }
    }
    rows
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[allow(dead_code)]
fn _use_bool(_: &BooleanArray) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::GitEnrichment;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn record(project: &str, file: &str, name: &str, line: u32, content: &str) -> VectorRecord {
        VectorRecord {
            collection: "default".to_string(),
            project_name: project.to_string(),
            name: name.to_string(),
            r#type: "function".to_string(),
            category: "code".to_string(),
            file_path: file.to_string(),
            start_line: line,
            end_line: line + 5,
            comments: String::new(),
            content: content.to_string(),
            summary: None,
            file_hash: "abc123".to_string(),
            vector: vec![0.1; DIM],
            git: GitEnrichment::default(),
        }
    }

    async fn open_store() -> (VectorStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(dir.path().join("db").to_str().unwrap(), DIM).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn insert_and_count() {
        let (mut store, _dir) = open_store().await;
        store.insert(&[record("P", "/a.rs", "f", 1, "fn f(){}")], "model-a").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn model_mismatch_rejected() {
        let (mut store, _dir) = open_store().await;
        store.insert(&[record("P", "/a.rs", "f", 1, "fn f(){}")], "model-a").await.unwrap();
        let err = store.insert(&[record("P", "/b.rs", "g", 1, "fn g(){}")], "model-b").await;
        assert!(matches!(err, Err(StoreError::ModelMismatch { .. })));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_by_file_removes_rows() {
        let (mut store, _dir) = open_store().await;
        store
            .insert(
                &[record("P", "/keep.rs", "f", 1, "fn f(){}"), record("P", "/gone.rs", "g", 1, "fn g(){}")],
                "model-a",
            )
            .await
            .unwrap();
        store.delete_by_file("/gone.rs").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dependency_round_trip() {
        let (mut store, _dir) = open_store().await;
        let dep = DependencyRecord {
            file_path: "/a.ts".to_string(),
            project_name: "P".to_string(),
            collection: "default".to_string(),
            imports: vec![ImportEdge::new("models.User", true).with_symbol("findById")],
            exports: vec!["f".to_string()],
        };
        store.upsert_dependency(&dep).await.unwrap();
        let fetched = store.get_dependency("/a.ts").await.unwrap().unwrap();
        assert_eq!(fetched.imports.len(), 1);
        assert_eq!(fetched.imports[0].source, "models.User");
    }

    #[tokio::test]
    async fn watch_list_round_trip() {
        let (mut store, _dir) = open_store().await;
        store
            .add_watch(&WatchListEntry {
                folder_path: "/repo".to_string(),
                project_name: "P".to_string(),
                collection: "default".to_string(),
            })
            .await
            .unwrap();
        let watches = store.list_watches().await.unwrap();
        assert_eq!(watches.len(), 1);
        store.remove_watch("/repo").await.unwrap();
        assert_eq!(store.list_watches().await.unwrap().len(), 0);
    }

    /// S3 (multi-project filter): a collection filter isolates exactly
    /// the matching project's row, and `list_projects` groups every
    /// indexed project under its collection.
    #[tokio::test]
    async fn collection_filter_isolates_project_and_list_projects_groups_them() {
        let (mut store, _dir) = open_store().await;
        let mut work_row = record("Proj-A", "/a.rs", "f", 1, "fn f(){}");
        work_row.collection = "Work".to_string();
        let mut personal_row = record("Proj-B", "/b.rs", "g", 1, "fn g(){}");
        personal_row.collection = "Personal".to_string();
        store.insert(&[work_row, personal_row], "model-a").await.unwrap();

        let filter = SearchFilter {
            collection: Some("Work".to_string()),
            ..Default::default()
        };
        let results = store.search(&[0.1; DIM], 10, &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.file_path, "/a.rs");

        let kb = store.list_projects().await.unwrap();
        assert_eq!(kb.get("Work"), Some(&vec!["Proj-A".to_string()]));
        assert_eq!(kb.get("Personal"), Some(&vec!["Proj-B".to_string()]));
    }

    #[tokio::test]
    async fn list_dependencies_returns_every_stored_row() {
        let (mut store, _dir) = open_store().await;
        store
            .upsert_dependency(&DependencyRecord {
                file_path: "/a.ts".to_string(),
                project_name: "P".to_string(),
                collection: "default".to_string(),
                imports: vec![ImportEdge::new("models.User", true).with_symbol("findById")],
                exports: vec!["f".to_string()],
            })
            .await
            .unwrap();
        store
            .upsert_dependency(&DependencyRecord {
                file_path: "/b.ts".to_string(),
                project_name: "P".to_string(),
                collection: "default".to_string(),
                imports: vec![],
                exports: vec!["g".to_string()],
            })
            .await
            .unwrap();

        let deps = store.list_dependencies().await.unwrap();
        assert_eq!(deps.len(), 2);
        assert!(deps.iter().any(|d| d.file_path == "/a.ts" && d.imports[0].symbols.contains("findById")));
        assert!(deps.iter().any(|d| d.file_path == "/b.ts" && d.exports == vec!["g".to_string()]));
    }

    #[tokio::test]
    async fn read_code_range_returns_inclusive_line_slice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.rs");
        std::fs::write(&path, "line1\nline2\nline3\nline4\n").unwrap();
        let content = VectorStore::read_code_range(path.to_str().unwrap(), 2, 3).await.unwrap();
        assert_eq!(content, "line2\nline3");
    }
}
