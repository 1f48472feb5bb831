use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{required_name, Actor, FieldError, Genre};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Play {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub image: Option<String>,
}

/// A play together with its genre and actor associations, as loaded from storage.
///
/// Handlers pick the response shape they need from this record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRecord {
    pub play: Play,
    pub genres: Vec<Genre>,
    pub actors: Vec<Actor>,
}

/// Write-side view: associations as ids.
#[derive(Debug, Clone, Serialize)]
pub struct PlaySummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub genres: Vec<i64>,
    pub actors: Vec<i64>,
    pub image: Option<String>,
}

/// List view: genre names and actor full names.
#[derive(Debug, Clone, Serialize)]
pub struct PlayListItem {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub genres: Vec<String>,
    pub actors: Vec<String>,
    pub image: Option<String>,
}

/// Detail view: nested genre and actor objects.
#[derive(Debug, Clone, Serialize)]
pub struct PlayDetail {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub genres: Vec<Genre>,
    pub actors: Vec<Actor>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayImage {
    pub id: i64,
    pub image: Option<String>,
}

impl From<&PlayRecord> for PlaySummary {
    fn from(record: &PlayRecord) -> Self {
        Self {
            id: record.play.id,
            title: record.play.title.clone(),
            description: record.play.description.clone(),
            genres: record.genres.iter().map(|g| g.id).collect(),
            actors: record.actors.iter().map(|a| a.id).collect(),
            image: record.play.image.clone(),
        }
    }
}

impl From<&PlayRecord> for PlayListItem {
    fn from(record: &PlayRecord) -> Self {
        Self {
            id: record.play.id,
            title: record.play.title.clone(),
            description: record.play.description.clone(),
            genres: record.genres.iter().map(|g| g.name.clone()).collect(),
            actors: record.actors.iter().map(Actor::full_name).collect(),
            image: record.play.image.clone(),
        }
    }
}

impl From<PlayRecord> for PlayDetail {
    fn from(record: PlayRecord) -> Self {
        Self {
            id: record.play.id,
            title: record.play.title,
            description: record.play.description,
            genres: record.genres,
            actors: record.actors,
            image: record.play.image,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlayInput {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub genres: Vec<i64>,
    #[serde(default)]
    pub actors: Vec<i64>,
}

impl PlayInput {
    /// Trims the title and removes repeated association ids.
    pub fn normalized(&self) -> Result<Self, FieldError> {
        let mut genres = self.genres.clone();
        genres.sort_unstable();
        genres.dedup();
        let mut actors = self.actors.clone();
        actors.sort_unstable();
        actors.dedup();

        Ok(Self {
            title: required_name("title", &self.title)?,
            description: self.description.clone(),
            genres,
            actors,
        })
    }
}

/// Play list filter. Within a field any listed id matches; across fields all must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayFilter {
    pub genres: Option<Vec<i64>>,
    pub actors: Option<Vec<i64>>,
}

impl PlayFilter {
    /// Builds a filter from raw `?genres=1,2&actors=3` query values.
    pub fn from_query(genres: Option<&str>, actors: Option<&str>) -> Result<Self, FieldError> {
        Ok(Self {
            genres: parse_id_list("genres", genres)?,
            actors: parse_id_list("actors", actors)?,
        })
    }

    pub fn matches(&self, record: &PlayRecord) -> bool {
        let genre_ok = self
            .genres
            .as_ref()
            .map_or(true, |ids| record.genres.iter().any(|g| ids.contains(&g.id)));
        let actor_ok = self
            .actors
            .as_ref()
            .map_or(true, |ids| record.actors.iter().any(|a| ids.contains(&a.id)));
        genre_ok && actor_ok
    }
}

/// Parses `"1,2,3"` into ids. An absent or blank value means "no filter".
pub(crate) fn parse_id_list(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<Vec<i64>>, FieldError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    raw.split(',')
        .map(|part| {
            part.trim().parse::<i64>().map_err(|_| {
                FieldError::new(field, format!("'{}' is not a valid id.", part.trim()))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
