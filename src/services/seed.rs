//! Sample catalog content for fresh deployments (`--seed`).

use crate::{models::movie::Movie, services::movie_store::MovieStore};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

struct SampleMovie {
    title: &'static str,
    synopsis: &'static str,
    rating: f64,
    poster: &'static str,
}

const SAMPLE_MOVIES: &[SampleMovie] = &[
    SampleMovie {
        title: "Shadow of the Deep",
        synopsis: "In a futuristic society, a scientist discovers a way to manipulate memories, leading to unexpected consequences and a race against time to undo the damage.",
        rating: 7.8,
        poster: "https://cinedb-bucket-2024.s3.us-west-2.amazonaws.com/ShadowOfTheDeep.png",
    },
    SampleMovie {
        title: "Celestial Nomads",
        synopsis: "In a distant galaxy, a group of interstellar travelers embarks on a journey to find a new home, facing unknown dangers and forging new alliances along the way.",
        rating: 9.3,
        poster: "https://cinedb-bucket-2024.s3.us-west-2.amazonaws.com/CelestialNomads.png",
    },
    SampleMovie {
        title: "Quantum Echo",
        synopsis: "In a world where time travel is possible, a detective must solve a series of crimes that echo through different timelines, all while confronting his own past.",
        rating: 8.0,
        poster: "https://cinedb-bucket-2024.s3.us-west-2.amazonaws.com/QuantumEcho.png",
    },
];

/// How many sample records made it into the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedReport {
    pub added: usize,
    pub total: usize,
}

/// Insert the sample movies, each under a fresh id. A failed insert is
/// logged and counted; it does not stop the remaining records.
pub async fn seed_catalog(store: &MovieStore) -> SeedReport {
    let mut added = 0;
    for sample in SAMPLE_MOVIES {
        let movie = Movie {
            id: Uuid::new_v4().to_string(),
            title: sample.title.to_string(),
            rating: sample.rating,
            synopsis: sample.synopsis.to_string(),
            year: None,
            duration: None,
            director: None,
            genre: None,
            cast: None,
            poster: Some(sample.poster.to_string()),
            created_at: Utc::now(),
            updated_at: None,
        };

        match store.put(&movie).await {
            Ok(()) => {
                added += 1;
                info!(id = %movie.id, "Added movie: {}", movie.title);
            }
            Err(err) => error!(error = %err, "Error adding movie {}", movie.title),
        }
    }

    let report = SeedReport {
        added,
        total: SAMPLE_MOVIES.len(),
    };
    info!("Added {} out of {} movies.", report.added, report.total);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[tokio::test]
    async fn seeds_every_sample_movie() {
        let store = MovieStore::new(test_support::pool().await);

        let report = seed_catalog(&store).await;
        assert_eq!(report, SeedReport { added: 3, total: 3 });

        let mut titles: Vec<_> = store
            .scan_all()
            .await
            .unwrap()
            .into_iter()
            .map(|movie| movie.title)
            .collect();
        titles.sort();
        assert_eq!(titles, ["Celestial Nomads", "Quantum Echo", "Shadow of the Deep"]);
    }

    #[tokio::test]
    async fn failed_inserts_are_counted_not_fatal() {
        let pool = test_support::pool().await;
        sqlx::query("DROP TABLE movies").execute(&*pool).await.unwrap();

        let report = seed_catalog(&MovieStore::new(pool)).await;
        assert_eq!(report, SeedReport { added: 0, total: 3 });
    }
}
