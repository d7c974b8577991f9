use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::application::errors::{EngineError, EngineResult};
use crate::domain::entities::{ArticleModification, Comment, DebateState, DebateWorkspace, ModificationResult};
use crate::domain::traits::Clock;

/// Debate service - article modifications inside a proposal's workspace
///
/// The workspace belongs to the proposal, so callers hand it in while holding
/// the proposal's exclusive section.
pub struct DebateService {
    required_points: i64,
    vote_duration: Duration,
    clock: Arc<dyn Clock>,
}

impl DebateService {
    pub fn new(required_points: i64, vote_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            required_points,
            vote_duration,
            clock,
        }
    }

    pub fn default_vote_duration(&self) -> Duration {
        self.vote_duration
    }

    pub fn propose_modification(
        &self,
        workspace: &mut DebateWorkspace,
        article_id: &str,
        author_id: &str,
        changes: &str,
    ) -> EngineResult<String> {
        if !workspace.covers(article_id) {
            return Err(EngineError::validation(format!(
                "article {} is not part of this proposal",
                article_id
            )));
        }
        if changes.trim().is_empty() {
            return Err(EngineError::validation("modification needs a change description"));
        }

        let mod_id = workspace.allocate_id();
        let modification = ArticleModification {
            id: mod_id.clone(),
            article_id: article_id.to_string(),
            author_id: author_id.to_string(),
            changes: changes.to_string(),
            votes: Default::default(),
            state: DebateState::Discussion,
            voting_deadline: None,
            required_points: self.required_points,
            comments: Vec::new(),
            created_at: self.clock.now(),
        };
        workspace.modifications.insert(mod_id.clone(), modification);
        tracing::debug!("Modification {} proposed on article {} by {}", mod_id, article_id, author_id);
        Ok(mod_id)
    }

    /// Opens voting on a modification. Returns the voting deadline.
    pub fn start_vote(
        &self,
        workspace: &mut DebateWorkspace,
        mod_id: &str,
        duration: Option<Duration>,
    ) -> EngineResult<DateTime<Utc>> {
        let modification = lookup(workspace, mod_id)?;
        if modification.state != DebateState::Discussion {
            return Err(EngineError::state(format!(
                "modification {} is in {}, not discussion",
                mod_id, modification.state
            )));
        }
        let duration = duration.unwrap_or(self.vote_duration);
        if duration <= Duration::zero() {
            return Err(EngineError::validation("voting duration must be positive"));
        }

        let deadline = self.clock.now() + duration;
        modification.state = DebateState::Voting;
        modification.voting_deadline = Some(deadline);
        Ok(deadline)
    }

    pub fn vote(&self, workspace: &mut DebateWorkspace, mod_id: &str, voter_id: &str, points: i64) -> EngineResult<()> {
        if points <= 0 {
            return Err(EngineError::validation("points must be positive"));
        }
        let now = self.clock.now();
        let modification = lookup(workspace, mod_id)?;
        if modification.state != DebateState::Voting {
            return Err(EngineError::state(format!("modification {} is not open for voting", mod_id)));
        }
        if modification.voting_deadline.map(|d| now > d).unwrap_or(true) {
            return Err(EngineError::state(format!("voting on {} has ended", mod_id)));
        }
        modification.votes.insert(voter_id.to_string(), points);
        Ok(())
    }

    /// Current result; a vote whose deadline has passed moves to review
    pub fn result(&self, workspace: &mut DebateWorkspace, mod_id: &str) -> EngineResult<ModificationResult> {
        let now = self.clock.now();
        let modification = lookup(workspace, mod_id)?;
        if modification.state == DebateState::Voting
            && modification.voting_deadline.map(|d| now > d).unwrap_or(false)
        {
            modification.state = DebateState::Reviewing;
        }
        Ok(modification.result())
    }

    pub fn add_comment(
        &self,
        workspace: &mut DebateWorkspace,
        mod_id: &str,
        author_id: &str,
        content: &str,
    ) -> EngineResult<()> {
        if content.trim().is_empty() {
            return Err(EngineError::validation("comment cannot be empty"));
        }
        let created_at = self.clock.now();
        lookup(workspace, mod_id)?.comments.push(Comment {
            author_id: author_id.to_string(),
            content: content.to_string(),
            created_at,
        });
        Ok(())
    }

    /// Modifications of one article, oldest first
    pub fn article_modifications(&self, workspace: &DebateWorkspace, article_id: &str) -> Vec<ArticleModification> {
        let mut found: Vec<ArticleModification> = workspace
            .modifications
            .values()
            .filter(|m| m.article_id == article_id)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        found
    }
}

fn lookup<'a>(workspace: &'a mut DebateWorkspace, mod_id: &str) -> EngineResult<&'a mut ArticleModification> {
    workspace
        .get_mut(mod_id)
        .ok_or_else(|| EngineError::validation(format!("unknown modification {}", mod_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::ManualClock;

    fn setup() -> (DebateService, Arc<ManualClock>, DebateWorkspace) {
        let clock = Arc::new(ManualClock::default());
        let svc = DebateService::new(100, Duration::hours(24), clock.clone());
        let workspace = DebateWorkspace::new(vec!["1".to_string(), "2".to_string()]);
        (svc, clock, workspace)
    }

    #[test]
    fn test_modification_only_for_proposal_articles() {
        let (svc, _, mut ws) = setup();
        assert!(svc.propose_modification(&mut ws, "7", "alice", "x").is_err());
        assert_eq!(svc.propose_modification(&mut ws, "1", "alice", "x").unwrap(), "mod_1");
        assert_eq!(svc.propose_modification(&mut ws, "2", "bob", "y").unwrap(), "mod_2");
    }

    #[test]
    fn test_vote_window() {
        let (svc, clock, mut ws) = setup();
        let id = svc.propose_modification(&mut ws, "1", "alice", "x").unwrap();
        // not started yet
        assert!(svc.vote(&mut ws, &id, "bob", 50).is_err());

        svc.start_vote(&mut ws, &id, None).unwrap();
        svc.vote(&mut ws, &id, "bob", 50).unwrap();
        svc.vote(&mut ws, &id, "bob", 70).unwrap();
        svc.vote(&mut ws, &id, "carol", 30).unwrap();

        clock.advance(Duration::hours(24));
        // deadline itself is still inside the window
        svc.vote(&mut ws, &id, "dave", 1).unwrap();
        clock.advance(Duration::seconds(1));
        assert!(svc.vote(&mut ws, &id, "erin", 1).is_err());

        let result = svc.result(&mut ws, &id).unwrap();
        assert_eq!(result.total_points, 101);
        assert_eq!(result.total_voters, 3);
        assert!(result.passed);
        assert_eq!(ws.get(&id).unwrap().state, DebateState::Reviewing);
    }

    #[test]
    fn test_start_vote_only_once() {
        let (svc, _, mut ws) = setup();
        let id = svc.propose_modification(&mut ws, "1", "alice", "x").unwrap();
        svc.start_vote(&mut ws, &id, Some(Duration::hours(1))).unwrap();
        assert!(matches!(
            svc.start_vote(&mut ws, &id, None),
            Err(EngineError::State(_))
        ));
    }

    #[test]
    fn test_comments_and_history() {
        let (svc, clock, mut ws) = setup();
        let first = svc.propose_modification(&mut ws, "1", "alice", "x").unwrap();
        clock.advance(Duration::minutes(1));
        svc.propose_modification(&mut ws, "2", "bob", "y").unwrap();
        svc.propose_modification(&mut ws, "1", "carol", "z").unwrap();

        svc.add_comment(&mut ws, &first, "bob", "agreed").unwrap();
        assert!(svc.add_comment(&mut ws, "mod_9", "bob", "hi").is_err());
        assert_eq!(ws.get(&first).unwrap().comments.len(), 1);

        let history = svc.article_modifications(&ws, "1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].author_id, "alice");
    }
}
