use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::application::errors::{EngineError, EngineResult};
use crate::domain::entities::article::CachedRequirement;
use crate::domain::entities::{Article, VoteRecord, IMMUTABLE_ARTICLE_ID};
use crate::domain::rules::{Requirement, Threshold};
use crate::domain::traits::Clock;
use crate::infrastructure::config::ArticleSeed;

const FOUNDATIONAL_TEXT: &str = "Fundamental article of the system";

/// Thresholds a proposal inherits from its article set
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalRequirements {
    pub requirement: Requirement,
    pub governing_article: Option<String>,
    pub per_article: BTreeMap<String, Requirement>,
    pub existing_articles: usize,
    pub new_articles: usize,
}

/// Constitution service - articles, their vote history and cached requirements
pub struct ConstitutionService {
    articles: RwLock<BTreeMap<String, Article>>,
    cache_ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl ConstitutionService {
    pub fn new(cache_ttl: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        let mut articles = BTreeMap::new();
        articles.insert(IMMUTABLE_ARTICLE_ID.to_string(), foundational_article(clock.as_ref()));
        Self {
            articles: RwLock::new(articles),
            cache_ttl,
            clock,
        }
    }

    pub async fn contains(&self, article_id: &str) -> bool {
        self.articles.read().await.contains_key(article_id)
    }

    pub async fn article(&self, article_id: &str) -> Option<Article> {
        self.articles.read().await.get(article_id).cloned()
    }

    pub async fn articles(&self) -> Vec<Article> {
        self.articles.read().await.values().cloned().collect()
    }

    /// Creates an article. A non-zero `baseline_voters` becomes its first
    /// history entry so the article is modifiable from the start.
    pub async fn add_article(
        &self,
        article_id: &str,
        text: &str,
        weight: f64,
        baseline_voters: u64,
    ) -> EngineResult<()> {
        if article_id == IMMUTABLE_ARTICLE_ID {
            return Err(EngineError::immutable("article 0 cannot be redefined"));
        }
        if article_id.trim().is_empty() || text.trim().is_empty() {
            return Err(EngineError::validation("article id and text are required"));
        }
        if !(weight.is_finite() && weight > 0.0) {
            return Err(EngineError::validation(format!("invalid weight {}", weight)));
        }

        let now = self.clock.now();
        let mut articles = self.articles.write().await;
        if articles.contains_key(article_id) {
            return Err(EngineError::validation(format!("article {} already exists", article_id)));
        }

        let mut article = Article::new(article_id, text, weight, now);
        if baseline_voters > 0 {
            article.history.push(VoteRecord {
                date: now,
                voters_participated: baseline_voters,
                support: 0,
                opposition: 0,
                passed: true,
            });
        }
        articles.insert(article_id.to_string(), article);
        tracing::info!("Article {} added (weight {}, baseline {})", article_id, weight, baseline_voters);
        Ok(())
    }

    /// Appends a finished vote to the article's history
    pub async fn record_vote(&self, article_id: &str, record: VoteRecord) -> EngineResult<()> {
        if article_id == IMMUTABLE_ARTICLE_ID {
            return Err(EngineError::immutable("article 0 has no vote history"));
        }
        let mut articles = self.articles.write().await;
        let article = articles
            .get_mut(article_id)
            .ok_or_else(|| EngineError::validation(format!("unknown article {}", article_id)))?;
        tracing::debug!(
            "Article {} vote recorded: {} voters, passed {}",
            article_id,
            record.voters_participated,
            record.passed
        );
        article.history.push(record);
        article.cached = None;
        Ok(())
    }

    pub async fn update_article_text(&self, article_id: &str, text: &str) -> EngineResult<()> {
        if article_id == IMMUTABLE_ARTICLE_ID {
            return Err(EngineError::immutable("article 0 cannot be modified"));
        }
        if text.trim().is_empty() {
            return Err(EngineError::validation("article text cannot be empty"));
        }
        let now = self.clock.now();
        let mut articles = self.articles.write().await;
        let article = articles
            .get_mut(article_id)
            .ok_or_else(|| EngineError::validation(format!("unknown article {}", article_id)))?;
        article.previous_text = std::mem::replace(&mut article.text, text.to_string());
        article.last_modified = now;
        tracing::info!("Article {} text updated", article_id);
        Ok(())
    }

    /// Cached requirement of one article, recomputed once stale
    pub async fn get_article_requirements(&self, article_id: &str) -> EngineResult<Requirement> {
        if article_id == IMMUTABLE_ARTICLE_ID {
            return Ok(Requirement::UNREACHABLE);
        }
        let now = self.clock.now();
        let mut articles = self.articles.write().await;
        let article = articles
            .get_mut(article_id)
            .ok_or_else(|| EngineError::validation(format!("unknown article {}", article_id)))?;
        Ok(self.refresh(article, now))
    }

    /// Requirement of the governing (most demanding) existing article among
    /// `article_ids`; ids not in the constitution count as new articles.
    pub async fn calculate_proposal_requirements(&self, article_ids: &[String]) -> ProposalRequirements {
        let now = self.clock.now();
        let mut articles = self.articles.write().await;

        let mut per_article = BTreeMap::new();
        let mut governing: Option<(String, Requirement)> = None;
        let mut new_articles = 0;

        for id in article_ids {
            let requirement = if id == IMMUTABLE_ARTICLE_ID {
                Requirement::UNREACHABLE
            } else if let Some(article) = articles.get_mut(id) {
                self.refresh(article, now)
            } else {
                new_articles += 1;
                continue;
            };
            per_article.insert(id.clone(), requirement);

            let replaces = match &governing {
                None => true,
                Some((_, current)) => demand(&requirement) > demand(current),
            };
            if replaces {
                governing = Some((id.clone(), requirement));
            }
        }

        let existing_articles = per_article.len();
        let (governing_article, requirement) = match governing {
            Some((id, requirement)) => (Some(id), requirement),
            None => (None, Requirement::UNREACHABLE),
        };
        ProposalRequirements {
            requirement,
            governing_article,
            per_article,
            existing_articles,
            new_articles,
        }
    }

    /// Adds articles from configuration that are not there yet
    pub async fn seed(&self, seeds: &[ArticleSeed]) -> EngineResult<usize> {
        let mut added = 0;
        for seed in seeds {
            if self.contains(&seed.id).await {
                continue;
            }
            self.add_article(&seed.id, &seed.text, seed.weight, seed.baseline_voters).await?;
            added += 1;
        }
        Ok(added)
    }

    pub async fn restore(&self, loaded: Vec<Article>) {
        let mut articles: BTreeMap<String, Article> =
            loaded.into_iter().map(|a| (a.id.clone(), a)).collect();
        // the sentinel is never taken from storage
        articles.insert(IMMUTABLE_ARTICLE_ID.to_string(), foundational_article(self.clock.as_ref()));
        *self.articles.write().await = articles;
    }

    fn refresh(&self, article: &mut Article, now: chrono::DateTime<chrono::Utc>) -> Requirement {
        let fresh = article.cached.as_ref().filter(|cached| {
            cached.history_len == article.history.len() && now - cached.computed_at <= self.cache_ttl
        });
        if let Some(cached) = fresh {
            return cached.requirement;
        }

        let previous_voters = article.last_turnout();
        let requirement = Requirement::from_turnout(previous_voters, article.weight);
        tracing::debug!(
            "Article {} requirement recomputed from {} voters: {} / {}",
            article.id,
            previous_voters,
            requirement.required_voters,
            requirement.min_participation
        );
        article.cached = Some(CachedRequirement {
            requirement,
            previous_voters,
            computed_at: now,
            history_len: article.history.len(),
        });
        requirement
    }
}

fn foundational_article(clock: &dyn Clock) -> Article {
    let mut article = Article::new(IMMUTABLE_ARTICLE_ID, FOUNDATIONAL_TEXT, 1.0, clock.now());
    article.cached = Some(CachedRequirement {
        requirement: Requirement::UNREACHABLE,
        previous_voters: 0,
        computed_at: clock.now(),
        history_len: 0,
    });
    article
}

fn demand(requirement: &Requirement) -> (Threshold, Threshold) {
    (requirement.required_voters, requirement.min_participation)
}
