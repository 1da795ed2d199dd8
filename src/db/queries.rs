use std::collections::HashMap;

use rusqlite::{Params, Row, params};
use serde::Deserialize;

use super::models::{Album, ReportResult};
use super::{ConnectionProvider, Database, GenreLister, PartialReport, Result};

/// Albums kept per genre in the most-played report.
pub const DEFAULT_TOP_N: usize = 5;

/// How the most-played report is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStrategy {
    /// One grouped query per genre, in genre-list order.
    #[default]
    PerGenre,
    /// A single `ROW_NUMBER() OVER (PARTITION BY ...)` query, regrouped into
    /// genre-list order afterwards.
    Windowed,
}

/// Read-only album queries over any connection provider.
///
/// Every failure is logged here, at the operation boundary, and then returned.
/// Callers that only want best-effort output can use `unwrap_or_default()`.
pub struct AlbumQueries<P, G> {
    provider: P,
    genre_lister: G,
    top_n: usize,
    strategy: ReportStrategy,
}

impl Database {
    /// Album queries backed by this database for both connections and genres.
    pub fn albums(&self) -> AlbumQueries<&Self, &Self> {
        AlbumQueries::new(self, self)
    }
}

impl<P: ConnectionProvider, G: GenreLister> AlbumQueries<P, G> {
    pub fn new(provider: P, genre_lister: G) -> Self {
        Self {
            provider,
            genre_lister,
            top_n: DEFAULT_TOP_N,
            strategy: ReportStrategy::default(),
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_strategy(mut self, strategy: ReportStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// All albums by one artist, newest first.
    pub fn albums_by_artist(&self, artist_id: i64) -> Result<Vec<Album>> {
        log::debug!("Querying albums for artist {artist_id}");
        let result = self.query_albums(
            "SELECT al.album_id, al.artist_id, al.title, al.release_year, ar.name AS artist_name
             FROM albums al
             JOIN artists ar ON al.artist_id = ar.artist_id
             WHERE al.artist_id = ?1
             ORDER BY al.release_year DESC",
            params![artist_id],
        );
        logged(result, || format!("getting albums for artist {artist_id}"))
    }

    /// All albums whose artist has exactly this primary genre, by title.
    pub fn albums_by_genre(&self, genre: &str) -> Result<Vec<Album>> {
        log::debug!("Querying albums for genre {genre:?}");
        let result = self.query_albums(
            "SELECT al.album_id, al.artist_id, al.title, al.release_year, ar.name AS artist_name
             FROM albums al
             JOIN artists ar ON al.artist_id = ar.artist_id
             WHERE ar.primary_genre = ?1
             ORDER BY al.title",
            params![genre],
        );
        logged(result, || format!("getting albums for genre {genre:?}"))
    }

    /// Albums whose title contains `term`, by title.
    ///
    /// `%`, `_` and `\` in `term` match literally. Matching is ASCII
    /// case-insensitive (SQLite `LIKE`). An empty term matches everything.
    pub fn search_albums(&self, term: &str) -> Result<Vec<Album>> {
        log::debug!("Searching albums for {term:?}");
        let result = self.query_albums(
            "SELECT al.album_id, al.artist_id, al.title, al.release_year, ar.name AS artist_name
             FROM albums al
             JOIN artists ar ON al.artist_id = ar.artist_id
             WHERE al.title LIKE ?1 ESCAPE '\\'
             ORDER BY al.title",
            params![contains_pattern(term)],
        );
        logged(result, || format!("searching albums for {term:?}"))
    }

    /// Top albums by play count for every genre, one ranked block per genre.
    ///
    /// Each row has the columns `genre`, `album_title`, `artist_name`,
    /// `play_count` and `genre_rank` (1-based within its block). Blocks follow
    /// the genre lister's order. On failure the error carries every block
    /// completed so far.
    pub fn most_played_albums_by_genre(
        &self,
    ) -> std::result::Result<Vec<ReportResult>, PartialReport> {
        log::debug!(
            "Building most-played report (top {}, {:?})",
            self.top_n,
            self.strategy
        );
        let result = match self.strategy {
            ReportStrategy::PerGenre => self.report_per_genre(),
            ReportStrategy::Windowed => self.report_windowed(),
        };
        match &result {
            Ok(rows) => log::trace!("Most-played report: {} rows", rows.len()),
            Err(e) => {
                log::error!("Error getting most played albums by genre: {e}");
                log::debug!("{:?}", e.source);
            }
        }
        result
    }

    fn query_albums<A: Params>(&self, sql: &str, params: A) -> Result<Vec<Album>> {
        let conn = self.provider.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let albums = stmt
            .query_map(params, album_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        log::trace!("{} albums", albums.len());
        Ok(albums)
    }

    fn report_per_genre(&self) -> std::result::Result<Vec<ReportResult>, PartialReport> {
        let genres = self.genre_lister.genres().map_err(|source| PartialReport {
            rows: Vec::new(),
            source,
        })?;

        let mut rows = Vec::new();
        for genre in &genres {
            match self.genre_block(genre) {
                Ok(block) => rows.extend(block),
                Err(source) => return Err(PartialReport { rows, source }),
            }
        }
        Ok(rows)
    }

    /// One genre's ranked block. Acquires its own connection.
    fn genre_block(&self, genre: &str) -> Result<Vec<ReportResult>> {
        let conn = self.provider.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT al.title, ar.name AS artist_name, COUNT(*) AS play_count
             FROM album_plays ap
             JOIN albums al ON ap.album_id = al.album_id
             JOIN artists ar ON al.artist_id = ar.artist_id
             WHERE ar.primary_genre = ?1
             GROUP BY al.album_id, al.title, ar.name
             ORDER BY play_count DESC
             LIMIT ?2",
        )?;

        let ranked: Vec<(String, String, i64)> = stmt
            .query_map(params![genre, self.limit()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ranked
            .into_iter()
            .zip(1..)
            .map(|((title, artist, plays), rank)| report_row(genre, title, artist, plays, rank))
            .collect())
    }

    fn report_windowed(&self) -> std::result::Result<Vec<ReportResult>, PartialReport> {
        let fail = |source| PartialReport {
            rows: Vec::new(),
            source,
        };
        let genres = self.genre_lister.genres().map_err(fail)?;
        let mut by_genre = self.ranked_all_genres().map_err(fail)?;

        // Regroup in genre-list order; genres the lister doesn't know are dropped.
        let mut rows = Vec::new();
        for genre in &genres {
            if let Some(block) = by_genre.remove(genre.as_str()) {
                rows.extend(block.into_iter().map(|(title, artist, plays, rank)| {
                    report_row(genre, title, artist, plays, rank)
                }));
            }
        }
        Ok(rows)
    }

    fn ranked_all_genres(&self) -> Result<HashMap<String, Vec<(String, String, i64, i32)>>> {
        let conn = self.provider.connection()?;
        let mut stmt = conn.prepare_cached(
            "SELECT genre, title, artist_name, play_count, genre_rank FROM (
                SELECT ar.primary_genre AS genre, al.title, ar.name AS artist_name,
                       COUNT(*) AS play_count,
                       ROW_NUMBER() OVER (
                           PARTITION BY ar.primary_genre ORDER BY COUNT(*) DESC
                       ) AS genre_rank
                FROM album_plays ap
                JOIN albums al ON ap.album_id = al.album_id
                JOIN artists ar ON al.artist_id = ar.artist_id
                WHERE ar.primary_genre IS NOT NULL
                GROUP BY al.album_id, al.title, ar.name, ar.primary_genre
             )
             WHERE genre_rank <= ?1
             ORDER BY genre, genre_rank",
        )?;

        let mut by_genre: HashMap<String, Vec<_>> = HashMap::new();
        let mut rows = stmt.query(params![self.limit()])?;
        while let Some(row) = rows.next()? {
            let genre: String = row.get(0)?;
            by_genre
                .entry(genre)
                .or_default()
                .push((row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?));
        }
        Ok(by_genre)
    }

    fn limit(&self) -> i64 {
        i64::try_from(self.top_n).unwrap_or(i64::MAX)
    }
}

fn album_from_row(row: &Row<'_>) -> rusqlite::Result<Album> {
    Ok(Album {
        album_id: row.get(0)?,
        artist_id: row.get(1)?,
        title: row.get(2)?,
        release_year: row.get(3)?,
        artist_name: row.get(4)?,
    })
}

fn report_row(genre: &str, title: String, artist: String, plays: i64, rank: i32) -> ReportResult {
    ReportResult::new()
        .with_column("genre", genre)
        .with_column("album_title", title)
        .with_column("artist_name", artist)
        .with_column("play_count", plays)
        .with_column("genre_rank", rank)
}

/// `%term%` with LIKE wildcards in `term` escaped by `\`.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn logged<T>(result: Result<T>, what: impl FnOnce() -> String) -> Result<T> {
    if let Err(e) = &result {
        log::error!("Error {}: {e}", what());
        log::debug!("{e:?}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use crate::db::models::ReportValue;
    use rusqlite::Connection;
    use std::cell::Cell;

    fn add_artist(db: &Database, name: &str, genre: &str) -> i64 {
        db.conn
            .execute(
                "INSERT INTO artists (name, primary_genre) VALUES (?1, ?2)",
                params![name, genre],
            )
            .unwrap();
        db.conn.last_insert_rowid()
    }

    fn add_album(db: &Database, artist_id: i64, title: &str, year: i32) -> i64 {
        db.conn
            .execute(
                "INSERT INTO albums (artist_id, title, release_year) VALUES (?1, ?2, ?3)",
                params![artist_id, title, year],
            )
            .unwrap();
        db.conn.last_insert_rowid()
    }

    fn add_plays(db: &Database, album_id: i64, count: usize) {
        let mut stmt = db
            .conn
            .prepare("INSERT INTO album_plays (album_id) VALUES (?1)")
            .unwrap();
        for _ in 0..count {
            stmt.execute(params![album_id]).unwrap();
        }
    }

    /// Rock: 7 albums with [50,40,30,20,10,5,1] plays. Jazz: 2 albums with [9,3].
    fn seeded_report_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        let pixies = add_artist(&db, "Pixies", "Rock");
        for (i, plays) in [50, 40, 30, 20, 10, 5, 1].into_iter().enumerate() {
            let album = add_album(&db, pixies, &format!("Rock Album {i}"), 1990);
            add_plays(&db, album, plays);
        }
        let miles = add_artist(&db, "Miles Davis", "Jazz");
        for (title, plays) in [("Kind of Blue", 9), ("Bitches Brew", 3)] {
            let album = add_album(&db, miles, title, 1959);
            add_plays(&db, album, plays);
        }
        db
    }

    struct FixedGenres(Vec<&'static str>);

    impl GenreLister for FixedGenres {
        fn genres(&self) -> Result<Vec<String>> {
            Ok(self.0.iter().map(|g| g.to_string()).collect())
        }
    }

    struct BrokenGenres;

    impl GenreLister for BrokenGenres {
        fn genres(&self) -> Result<Vec<String>> {
            Err(DbError::Unavailable("genre lookup failed".into()))
        }
    }

    struct Offline;

    impl ConnectionProvider for Offline {
        fn connection(&self) -> Result<&Connection> {
            Err(DbError::Unavailable("offline".into()))
        }
    }

    /// Hands out `remaining` connections, then fails.
    struct FailAfter<'a> {
        db: &'a Database,
        remaining: Cell<usize>,
    }

    impl ConnectionProvider for FailAfter<'_> {
        fn connection(&self) -> Result<&Connection> {
            let left = self.remaining.get();
            if left == 0 {
                return Err(DbError::Unavailable("connection dropped".into()));
            }
            self.remaining.set(left - 1);
            Ok(&self.db.conn)
        }
    }

    fn summarize(rows: &[ReportResult]) -> Vec<(String, i64, i64)> {
        rows.iter()
            .map(|r| {
                (
                    r.get_text("genre").unwrap().to_string(),
                    r.get_i64("play_count").unwrap(),
                    r.get_i64("genre_rank").unwrap(),
                )
            })
            .collect()
    }

    fn expected_rock_then_jazz() -> Vec<(String, i64, i64)> {
        let mut expected: Vec<_> = [50, 40, 30, 20, 10]
            .into_iter()
            .zip(1..)
            .map(|(plays, rank)| ("Rock".to_string(), plays, rank))
            .collect();
        expected.push(("Jazz".to_string(), 9, 1));
        expected.push(("Jazz".to_string(), 3, 2));
        expected
    }

    #[test]
    fn test_albums_by_artist_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let pixies = add_artist(&db, "Pixies", "Rock");
        let other = add_artist(&db, "Breeders", "Rock");
        add_album(&db, pixies, "Surfer Rosa", 1988);
        add_album(&db, pixies, "Trompe le Monde", 1991);
        add_album(&db, pixies, "Doolittle", 1989);
        add_album(&db, other, "Last Splash", 1993);

        let albums = db.albums().albums_by_artist(pixies).unwrap();
        assert_eq!(albums.len(), 3);
        assert!(albums.iter().all(|a| a.artist_id == pixies));
        assert!(albums.iter().all(|a| a.artist_name == "Pixies"));
        let years: Vec<i32> = albums.iter().map(|a| a.release_year).collect();
        assert_eq!(years, vec![1991, 1989, 1988]);
    }

    #[test]
    fn test_albums_by_unknown_artist_is_empty() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.albums().albums_by_artist(404).unwrap().is_empty());
    }

    #[test]
    fn test_albums_by_genre_sorted_by_title() {
        let db = Database::open_in_memory().unwrap();
        let pixies = add_artist(&db, "Pixies", "Rock");
        let miles = add_artist(&db, "Miles Davis", "Jazz");
        add_album(&db, pixies, "Surfer Rosa", 1988);
        add_album(&db, pixies, "Doolittle", 1989);
        add_album(&db, miles, "Kind of Blue", 1959);

        let albums = db.albums().albums_by_genre("Rock").unwrap();
        let titles: Vec<&str> = albums.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Doolittle", "Surfer Rosa"]);

        // Exact match only
        assert!(db.albums().albums_by_genre("rock").unwrap().is_empty());
        assert!(db.albums().albums_by_genre("Polka").unwrap().is_empty());
    }

    #[test]
    fn test_search_substring() {
        let db = Database::open_in_memory().unwrap();
        let a = add_artist(&db, "Various", "Pop");
        add_album(&db, a, "xxabcxx", 2000);
        add_album(&db, a, "abc", 2001);
        add_album(&db, a, "ab c", 2002);

        let titles: Vec<String> = db
            .albums()
            .search_albums("abc")
            .unwrap()
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["abc", "xxabcxx"]);

        assert_eq!(db.albums().search_albums("").unwrap().len(), 3);
    }

    #[test]
    fn test_search_ignores_ascii_case() {
        let db = Database::open_in_memory().unwrap();
        let a = add_artist(&db, "Pixies", "Rock");
        add_album(&db, a, "Doolittle", 1989);
        assert_eq!(db.albums().search_albums("DOO").unwrap().len(), 1);
    }

    #[test]
    fn test_search_wildcards_are_literal() {
        let db = Database::open_in_memory().unwrap();
        let a = add_artist(&db, "Various", "Pop");
        add_album(&db, a, "100% Fun", 2000);
        add_album(&db, a, "1000 Fun", 2000);
        add_album(&db, a, "A_B", 2000);
        add_album(&db, a, "AxB", 2000);
        add_album(&db, a, r"Back\Slash", 2000);

        let search = |term: &str| -> Vec<String> {
            db.albums()
                .search_albums(term)
                .unwrap()
                .into_iter()
                .map(|a| a.title)
                .collect()
        };
        assert_eq!(search("100%"), vec!["100% Fun"]);
        assert_eq!(search("A_B"), vec!["A_B"]);
        assert_eq!(search(r"k\S"), vec![r"Back\Slash"]);
    }

    #[test]
    fn test_contains_pattern() {
        assert_eq!(contains_pattern(""), "%%");
        assert_eq!(contains_pattern("abc"), "%abc%");
        assert_eq!(contains_pattern("5%_off"), r"%5\%\_off%");
        assert_eq!(contains_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn test_most_played_blocks_in_lister_order() {
        let db = seeded_report_db();
        let queries = AlbumQueries::new(&db, FixedGenres(vec!["Rock", "Jazz"]));
        let rows = queries.most_played_albums_by_genre().unwrap();

        assert_eq!(summarize(&rows), expected_rock_then_jazz());

        let first = &rows[0];
        let cols: Vec<&str> = first.columns().collect();
        assert_eq!(
            cols,
            vec!["genre", "album_title", "artist_name", "play_count", "genre_rank"]
        );
        assert_eq!(first.get_text("album_title"), Some("Rock Album 0"));
        assert_eq!(first.get_text("artist_name"), Some("Pixies"));
        assert_eq!(first.get("play_count"), Some(&ReportValue::Long(50)));
        assert_eq!(first.get("genre_rank"), Some(&ReportValue::Integer(1)));
        assert_eq!(rows[5].get_text("album_title"), Some("Kind of Blue"));
    }

    #[test]
    fn test_most_played_windowed_matches_per_genre() {
        let db = seeded_report_db();
        let per_genre = AlbumQueries::new(&db, FixedGenres(vec!["Rock", "Jazz"]))
            .most_played_albums_by_genre()
            .unwrap();
        let windowed = AlbumQueries::new(&db, FixedGenres(vec!["Rock", "Jazz"]))
            .with_strategy(ReportStrategy::Windowed)
            .most_played_albums_by_genre()
            .unwrap();
        assert_eq!(per_genre, windowed);
    }

    #[test]
    fn test_most_played_default_genre_order() {
        let db = seeded_report_db();
        let rows = db.albums().most_played_albums_by_genre().unwrap();
        // Database lists genres alphabetically
        assert_eq!(rows[0].get_text("genre"), Some("Jazz"));
        assert_eq!(rows.len(), 7);
    }

    #[test]
    fn test_most_played_top_n() {
        let db = seeded_report_db();
        let rows = db.albums().with_top_n(1).most_played_albums_by_genre().unwrap();
        let genres: Vec<&str> = rows.iter().filter_map(|r| r.get_text("genre")).collect();
        assert_eq!(genres, vec!["Jazz", "Rock"]);
        assert!(rows.iter().all(|r| r.get_i64("genre_rank") == Some(1)));
    }

    #[test]
    fn test_most_played_genre_without_plays_is_skipped() {
        let db = seeded_report_db();
        let quiet = add_artist(&db, "Nobody", "Ambient");
        add_album(&db, quiet, "Silence", 2020);

        let queries = AlbumQueries::new(&db, FixedGenres(vec!["Ambient", "Jazz"]));
        let rows = queries.most_played_albums_by_genre().unwrap();
        assert_eq!(summarize(&rows), expected_rock_then_jazz()[5..].to_vec());
    }

    #[test]
    fn test_operations_are_idempotent() {
        let db = seeded_report_db();
        let q = db.albums();
        assert_eq!(q.albums_by_genre("Rock").unwrap(), q.albums_by_genre("Rock").unwrap());
        assert_eq!(q.search_albums("Album").unwrap(), q.search_albums("Album").unwrap());
        assert_eq!(
            q.most_played_albums_by_genre().unwrap(),
            q.most_played_albums_by_genre().unwrap()
        );
    }

    #[test]
    fn test_offline_provider_reports_failure() {
        let queries = AlbumQueries::new(Offline, FixedGenres(vec!["Rock"]));
        assert!(matches!(
            queries.albums_by_artist(1),
            Err(DbError::Unavailable(_))
        ));
        assert!(queries.albums_by_genre("Rock").is_err());
        assert!(queries.search_albums("x").unwrap_or_default().is_empty());

        let err = queries.most_played_albums_by_genre().unwrap_err();
        assert!(err.rows.is_empty());
    }

    #[test]
    fn test_report_keeps_completed_blocks_on_failure() {
        let db = seeded_report_db();
        let provider = FailAfter {
            db: &db,
            remaining: Cell::new(1),
        };
        let queries = AlbumQueries::new(provider, FixedGenres(vec!["Rock", "Jazz"]));

        let err = queries.most_played_albums_by_genre().unwrap_err();
        assert!(matches!(err.source, DbError::Unavailable(_)));
        let rows = err.into_rows();
        assert_eq!(summarize(&rows), expected_rock_then_jazz()[..5].to_vec());
    }

    #[test]
    fn test_report_genre_lister_failure() {
        let db = seeded_report_db();
        let err = AlbumQueries::new(&db, BrokenGenres)
            .most_played_albums_by_genre()
            .unwrap_err();
        assert!(err.rows.is_empty());
    }

    #[test]
    fn test_report_missing_table_is_error() {
        let db = seeded_report_db();
        db.conn.execute_batch("DROP TABLE album_plays").unwrap();
        for strategy in [ReportStrategy::PerGenre, ReportStrategy::Windowed] {
            let err = db
                .albums()
                .with_strategy(strategy)
                .most_played_albums_by_genre()
                .unwrap_err();
            assert!(matches!(err.source, DbError::Sqlite(_)));
            assert!(err.rows.is_empty());
        }
    }
}
