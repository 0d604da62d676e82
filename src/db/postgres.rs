// SPDX-License-Identifier: MPL-2.0

use crate::db::schema::POSTGRES_SCHEMA;
use crate::db::{DbError, Post, PostQuery};
use std::sync::Arc;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

/// Handle to a Postgres feed database.
///
/// `tokio_postgres::Client` pipelines concurrent queries over one connection,
/// so clones share it between the indexer and request handlers.
#[derive(Clone)]
pub struct PostgresDb {
    client: Arc<Client>,
}

impl PostgresDb {
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection closed");
            }
        });

        client.batch_execute(POSTGRES_SCHEMA).await?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Insert posts in one statement, skipping existing uris
    pub async fn insert_posts(&self, posts: &[Post]) -> Result<usize, DbError> {
        let uris: Vec<&str> = posts.iter().map(|p| p.uri.as_str()).collect();
        let cids: Vec<&str> = posts.iter().map(|p| p.cid.as_str()).collect();
        let creators: Vec<&str> = posts.iter().map(|p| p.creator.as_str()).collect();
        let indexed_at: Vec<&str> = posts.iter().map(|p| p.indexed_at.as_str()).collect();

        let inserted = self
            .client
            .execute(
                r#"
                INSERT INTO post (uri, cid, creator, "indexedAt")
                SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
                ON CONFLICT (uri) DO NOTHING
                "#,
                &[&uris, &cids, &creators, &indexed_at],
            )
            .await?;

        Ok(inserted as usize)
    }

    /// Delete posts by uri in one statement
    pub async fn delete_posts(&self, uris: &[String]) -> Result<usize, DbError> {
        let deleted = self
            .client
            .execute("DELETE FROM post WHERE uri = ANY($1)", &[&uris])
            .await?;

        Ok(deleted as usize)
    }

    pub async fn get_cursor(&self, service: &str) -> Result<Option<i64>, DbError> {
        let row = self
            .client
            .query_opt("SELECT cursor FROM sub_state WHERE service = $1", &[&service])
            .await?;

        Ok(row.map(|row| row.get(0)))
    }

    pub async fn upsert_cursor(&self, service: &str, cursor: i64) -> Result<(), DbError> {
        self.client
            .execute(
                r#"
                INSERT INTO sub_state (service, cursor) VALUES ($1, $2)
                ON CONFLICT (service) DO UPDATE SET cursor = EXCLUDED.cursor
                "#,
                &[&service, &cursor],
            )
            .await?;

        Ok(())
    }

    /// Get a page of posts, newest first
    pub async fn select_posts(&self, query: &PostQuery<'_>) -> Result<Vec<Post>, DbError> {
        let limit = query.limit as i64;
        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(creators) = &query.creators {
            params.push(creators);
            clauses.push(format!("creator = ANY(${})", params.len()));
        }

        if let Some(since) = &query.since {
            params.push(since);
            clauses.push(format!(r#""indexedAt" >= ${}"#, params.len()));
        }

        if let Some(before) = query.before {
            params.push(&before.indexed_at);
            let at = params.len();
            params.push(&before.cid);
            let cid = params.len();
            clauses.push(format!(
                r#"("indexedAt" < ${at} OR ("indexedAt" = ${at} AND cid < ${cid}))"#
            ));
        }

        params.push(&limit);
        let limit_param = params.len();

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            r#"
            SELECT uri, cid, creator, "indexedAt"
            FROM post
            {where_sql}
            ORDER BY "indexedAt" DESC, cid DESC
            LIMIT ${limit_param}
            "#
        );

        let rows = self.client.query(&sql, &params).await?;
        Ok(rows.iter().map(Self::row_to_post).collect())
    }

    fn row_to_post(row: &Row) -> Post {
        Post {
            uri: row.get(0),
            cid: row.get(1),
            creator: row.get(2),
            indexed_at: row.get(3),
        }
    }
}
