use crate::model::Song;

/// Whether `song` matches a free-text query: the query appears in the title or
/// the artist, ignoring case.
pub fn matches(song: &Song, query: &str) -> bool {
    let query = query.to_lowercase();
    song.title.to_lowercase().contains(&query) || song.artist.to_lowercase().contains(&query)
}

/// Songs whose title or artist contains `query` (case-insensitive), in their
/// original order. An empty query returns every song.
pub fn filter_songs<'a>(query: &str, songs: &'a [Song]) -> Vec<&'a Song> {
    if query.is_empty() {
        return songs.iter().collect();
    }

    songs.iter().filter(|song| matches(song, query)).collect()
}
