//! Views: filtered, sorted, paginated and lazily materialized slices of the
//! index.
//!
//! A [`View`] is immutable. The filter is compiled into a store [`Query`] when
//! the view is built, so a bad specification fails at construction. The
//! query runs at most once per view, on first access to [`View::entries`] or
//! [`View::last_modified`]; concurrent first accesses share that one query.
//! [`View::with`] derives a new view and never touches the original's cache.

mod spec;

pub use spec::{DateSpec, SortOrder, ViewSpec};

use crate::config::Timezone;
use crate::context::AppContext;
use crate::db::{Cmp, Direction, EntryStore, Field, Predicate, Query, Value};
use crate::entry::Entry;
use crate::error::{InvalidViewSpec, ViewError};
use crate::model::EntryRecord;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

#[derive(Debug)]
struct Materialized {
    entries: Vec<Entry>,
    last_modified: DateTime<Utc>,
}

pub struct View {
    store: Arc<dyn EntryStore>,
    timezone: Timezone,
    spec: ViewSpec,
    now: DateTime<Utc>,
    /// Visibility, category and date clauses; cursors are added on materialization.
    filter: Predicate,
    result: OnceCell<Materialized>,
}

impl View {
    /// Build a view over the context's store, interpreting dates in the site
    /// timezone.
    pub fn new(ctx: &AppContext, spec: ViewSpec) -> Result<Self, InvalidViewSpec> {
        Self::with_store(Arc::clone(&ctx.store), ctx.config.site.timezone, spec)
    }

    pub fn with_store(
        store: Arc<dyn EntryStore>,
        timezone: Timezone,
        spec: ViewSpec,
    ) -> Result<Self, InvalidViewSpec> {
        spec.validate()?;
        let now = Utc::now();
        let filter = compile_filter(&spec, timezone, now)?;
        Ok(Self {
            store,
            timezone,
            spec,
            now,
            filter,
            result: OnceCell::new(),
        })
    }

    pub fn spec(&self) -> &ViewSpec {
        &self.spec
    }

    /// A new view with `extra` layered over this one's options.
    pub fn with(&self, extra: &ViewSpec) -> Result<View, InvalidViewSpec> {
        View::with_store(
            Arc::clone(&self.store),
            self.timezone,
            self.spec.merged(extra),
        )
    }

    /// Matching entries in view order.
    pub async fn entries(&self) -> Result<&[Entry], ViewError> {
        Ok(&self.materialize().await?.entries)
    }

    /// Latest modification time among the entries, or the time the view was
    /// materialized if it is empty.
    pub async fn last_modified(&self) -> Result<DateTime<Utc>, ViewError> {
        Ok(self.materialize().await?.last_modified)
    }

    pub fn is_materialized(&self) -> bool {
        self.result.initialized()
    }

    async fn materialize(&self) -> Result<&Materialized, ViewError> {
        self.result.get_or_try_init(|| self.run()).await
    }

    #[instrument(skip_all)]
    async fn run(&self) -> Result<Materialized, ViewError> {
        let sort = sort_keys(self.spec.sort.unwrap_or_default());
        let mut predicate = self.filter.clone();

        let mut lower = false;
        let mut upper = false;
        for (key, id) in self.spec.cursors() {
            let anchor = self
                .store
                .get(id)
                .await?
                .ok_or(ViewError::UnknownCursor { key, id })?;
            let (after, inclusive) = match key {
                "start_entry" => (true, true),
                "prev_entry" => (true, false),
                "last_entry" => (false, true),
                _ => (false, false),
            };
            if after {
                lower = true;
            } else {
                upper = true;
            }
            predicate = predicate.and(cursor_bound(&sort, &anchor, after, inclusive));
        }

        // With only an upper bound, the page is the `limit` entries nearest to it.
        let reverse = upper && !lower && self.spec.limit.is_some();
        let query = Query {
            predicate,
            sort: if reverse {
                sort.iter().map(|(f, d)| (*f, d.reversed())).collect()
            } else {
                sort
            },
            limit: self.spec.limit,
        };

        let mut records = self.store.query(&query).await?;
        if reverse {
            records.reverse();
        }
        debug!(count = records.len(), "materialized view");

        let last_modified = records
            .iter()
            .map(|r| r.last_modified)
            .max()
            .unwrap_or_else(Utc::now);
        Ok(Materialized {
            entries: records.into_iter().map(Entry::from).collect(),
            last_modified,
        })
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("spec", &self.spec)
            .field("now", &self.now)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}

fn compile_filter(
    spec: &ViewSpec,
    timezone: Timezone,
    now: DateTime<Utc>,
) -> Result<Predicate, InvalidViewSpec> {
    let mut clauses = vec![Predicate::Visible {
        now,
        include_future: spec.future.unwrap_or(false),
    }];

    if let Some(category) = &spec.category {
        let recurse = spec.recurse.unwrap_or(false);
        if !(recurse && category.is_empty()) {
            let exact = Predicate::eq(Field::Category, category.as_str());
            clauses.push(if recurse {
                exact.or(Predicate::HasPrefix {
                    field: Field::Category,
                    prefix: format!("{category}/"),
                })
            } else {
                exact
            });
        }
    }

    if let Some(date) = &spec.date {
        let (start, end) = date.bounds(timezone).ok_or_else(|| {
            InvalidViewSpec::value("date", format!("{date:?}"), "not representable in timezone")
        })?;
        clauses.push(Predicate::compare(
            Field::EntryDate,
            Cmp::Ge,
            start.timestamp_millis(),
        ));
        clauses.push(Predicate::compare(
            Field::EntryDate,
            Cmp::Lt,
            end.timestamp_millis(),
        ));
    }

    Ok(Predicate::All(clauses))
}

fn sort_keys(order: SortOrder) -> Vec<(Field, Direction)> {
    let primary = match order {
        SortOrder::Newest => (Field::EntryDate, Direction::Desc),
        SortOrder::Oldest => (Field::EntryDate, Direction::Asc),
        SortOrder::Title => (Field::Title, Direction::Asc),
    };
    vec![primary, (Field::Id, Direction::Asc)]
}

/// Entries on one side of `anchor` in view order. The sort is a primary key
/// followed by the id tiebreak.
fn cursor_bound(
    sort: &[(Field, Direction)],
    anchor: &EntryRecord,
    after: bool,
    inclusive: bool,
) -> Predicate {
    let (field, direction) = sort[0];
    let value: Value = match field {
        Field::EntryDate => anchor.entry_date.timestamp_millis().into(),
        Field::Title => anchor.title.clone().unwrap_or_default().into(),
        Field::Category => anchor.category.clone().into(),
        Field::Id => anchor.id.into(),
    };

    let beyond = match (direction, after) {
        (Direction::Asc, true) | (Direction::Desc, false) => Cmp::Gt,
        (Direction::Asc, false) | (Direction::Desc, true) => Cmp::Lt,
    };
    let tie = match (after, inclusive) {
        (true, true) => Cmp::Ge,
        (true, false) => Cmp::Gt,
        (false, true) => Cmp::Le,
        (false, false) => Cmp::Lt,
    };

    Predicate::compare(field, beyond, value.clone()).or(Predicate::All(vec![
        Predicate::compare(field, Cmp::Eq, value),
        Predicate::compare(Field::Id, tie, anchor.id),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, run_migrations, SqliteStore};
    use crate::model::{DeclaredStatus, NewEntry};
    use chrono::Duration;

    async fn store() -> Arc<dyn EntryStore> {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        Arc::new(SqliteStore::new(pool))
    }

    async fn add(store: &Arc<dyn EntryStore>, id: i64, category: &str, title: &str, days: i64) {
        let date = Utc::now() - Duration::days(days);
        store
            .upsert(&NewEntry {
                requested_id: Some(id),
                file_path: format!("{category}/{id}.md"),
                category: category.into(),
                slug: title.to_lowercase(),
                status: DeclaredStatus::Published,
                entry_date: date.into(),
                last_modified: date,
                title: Some(title.into()),
                body: String::new(),
                more: String::new(),
                meta: Default::default(),
                content_hash: id.to_string(),
            })
            .await
            .unwrap();
    }

    async fn ids(view: &View) -> Vec<i64> {
        view.entries().await.unwrap().iter().map(Entry::id).collect()
    }

    #[tokio::test]
    async fn title_sort_breaks_ties_by_id() {
        let s = store().await;
        add(&s, 3, "blog", "Beta", 1).await;
        add(&s, 1, "blog", "Alpha", 2).await;
        add(&s, 2, "blog", "Beta", 3).await;
        let view = View::with_store(s, Timezone::Local, ViewSpec::new().sort(SortOrder::Title))
            .unwrap();
        assert_eq!(ids(&view).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn cursors_page_in_both_directions() {
        let s = store().await;
        for id in 1..=6 {
            add(&s, id, "blog", "t", 10 - id).await;
        }
        let base = View::with_store(
            s,
            Timezone::Local,
            ViewSpec::new().sort(SortOrder::Newest).limit(2),
        )
        .unwrap();
        assert_eq!(ids(&base).await, vec![6, 5]);

        let older = base.with(&ViewSpec::new().prev_entry(5)).unwrap();
        assert_eq!(ids(&older).await, vec![4, 3]);

        let newer = base.with(&ViewSpec::new().next_entry(3)).unwrap();
        assert_eq!(ids(&newer).await, vec![5, 4]);

        let ending = base.with(&ViewSpec::new().last_entry(2)).unwrap();
        assert_eq!(ids(&ending).await, vec![3, 2]);

        let window = View::with_store(
            Arc::clone(&base.store),
            Timezone::Local,
            ViewSpec::new().start_entry(5).last_entry(3),
        )
        .unwrap();
        assert_eq!(ids(&window).await, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn unknown_cursor_is_reported() {
        let s = store().await;
        let view = View::with_store(s, Timezone::Local, ViewSpec::new().start_entry(99)).unwrap();
        assert!(matches!(
            view.entries().await,
            Err(ViewError::UnknownCursor { key: "start_entry", id: 99 })
        ));
    }

    #[test]
    fn category_clause_shapes() {
        let now = Utc::now();
        let all = compile_filter(
            &ViewSpec::new().category("").recurse(true),
            Timezone::Local,
            now,
        )
        .unwrap();
        assert_eq!(
            all,
            Predicate::All(vec![Predicate::Visible {
                now,
                include_future: false
            }])
        );

        let exact = compile_filter(&ViewSpec::new().category(""), Timezone::Local, now).unwrap();
        assert_eq!(
            exact,
            Predicate::All(vec![
                Predicate::Visible {
                    now,
                    include_future: false
                },
                Predicate::eq(Field::Category, ""),
            ])
        );
    }
}
