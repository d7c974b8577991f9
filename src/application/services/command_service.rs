use std::fmt::Write as _;
use std::sync::Arc;

use crate::application::engine::Engine;
use crate::application::errors::CommandError;
use crate::domain::entities::{Command, CommandRegistry, Content, Message, ProposedArticle, VoterSnapshot};
use crate::domain::rules::ProposalState;

/// Service for managing and executing text commands against the engine
pub struct CommandService {
    registry: CommandRegistry,
    prefix: String,
    engine: Arc<Engine>,
}

impl CommandService {
    pub fn new(prefix: impl Into<String>, engine: Arc<Engine>) -> Self {
        let mut service = Self {
            registry: CommandRegistry::new(),
            prefix: prefix.into(),
            engine,
        };
        service.register_defaults();
        service
    }

    pub fn register(&mut self, command: Command) {
        self.registry.register(command);
    }

    fn register_defaults(&mut self) {
        let commands = [
            Command::new("register")
                .with_description("Join with a fresh budget of 1000 points")
                .with_aliases(&["registrar"]),
            Command::new("delegate")
                .with_description("Delegate points to another voter")
                .with_aliases(&["delegar"])
                .with_usage("delegate <voter> <points> [sub]"),
            Command::new("subdelegate")
                .with_description("Pass on points received as subdelegable")
                .with_aliases(&["subdelegar"])
                .with_usage("subdelegate <voter> <points>"),
            Command::new("revoke")
                .with_description("Take back a delegation")
                .with_aliases(&["revocar"])
                .with_usage("revoke <voter>"),
            Command::new("profile")
                .with_description("Show points and delegations")
                .with_aliases(&["perfil"])
                .with_usage("profile [voter]"),
            Command::new("propose")
                .with_description("Create a proposal; prefix new article ids with +")
                .with_aliases(&["proponer"])
                .with_usage("propose \"<title>\" <article>=\"<text>\" [+<new>=\"<text>\" ...]"),
            Command::new("advance")
                .with_description("Move a proposal to its next state")
                .with_aliases(&["avanzar"])
                .with_usage("advance <proposal> <state>"),
            Command::new("support")
                .with_description("Back a proposal while it gathers support")
                .with_aliases(&["apoyar"])
                .with_usage("support <proposal>"),
            Command::new("modify")
                .with_description("Propose an article modification during debate")
                .with_aliases(&["modificar"])
                .with_usage("modify <proposal> <article> <changes>"),
            Command::new("start-vote")
                .with_description("Open voting on a modification")
                .with_aliases(&["iniciar-votacion"])
                .with_usage("start-vote <proposal> <modification> [hours]"),
            Command::new("vote-mod")
                .with_description("Vote on a modification")
                .with_aliases(&["votar-mod"])
                .with_usage("vote-mod <proposal> <modification> <points>"),
            Command::new("mod-result")
                .with_description("Show a modification's result")
                .with_aliases(&["resultado-mod"])
                .with_usage("mod-result <proposal> <modification>"),
            Command::new("comment")
                .with_description("Comment on a modification")
                .with_aliases(&["comentar"])
                .with_usage("comment <proposal> <modification> <text>"),
            Command::new("commit")
                .with_description("Commit points to a group of articles")
                .with_aliases(&["votar"])
                .with_usage("commit <proposal> <article,article,...> <points> [for|against]"),
            Command::new("close")
                .with_description("Approve a proposal that met its thresholds")
                .with_aliases(&["cerrar"])
                .with_usage("close <proposal>"),
            Command::new("finalize")
                .with_description("End voting on a proposal")
                .with_aliases(&["finalizar"])
                .with_usage("finalize <proposal>"),
            Command::new("requirements")
                .with_description("Show an article's quorum requirements")
                .with_aliases(&["requisitos"])
                .with_usage("requirements <article>"),
            Command::new("proposal")
                .with_description("Show a proposal")
                .with_aliases(&["propuesta"])
                .with_usage("proposal <id>"),
            Command::new("help")
                .with_description("Show help message")
                .with_aliases(&["ayuda"])
                .with_usage("help [command]"),
            Command::new("version").with_description("Show bot version"),
        ];
        for command in commands {
            self.register(command);
        }
    }

    /// Runs a command message. Plain text yields `None`.
    pub async fn handle(&self, message: &Message) -> Result<Option<String>, CommandError> {
        let Content::Command { name, args } = &message.content else {
            return Ok(None);
        };

        let cmd = self
            .registry
            .find(name)
            .ok_or_else(|| CommandError::NotFound(name.clone()))?;
        tracing::debug!("Command {} from {:?}", cmd.name, message.sender);

        let sender = message.sender.as_deref();
        let reply = match cmd.name.as_str() {
            "register" => self.register_voter(sender).await?,
            "delegate" => self.delegate(sender, args).await?,
            "subdelegate" => self.subdelegate(sender, args).await?,
            "revoke" => self.revoke(sender, args).await?,
            "profile" => self.profile(sender, args).await?,
            "propose" => self.propose(sender, args).await?,
            "advance" => self.advance(args).await?,
            "support" => self.support(sender, args).await?,
            "modify" => self.modify(sender, args).await?,
            "start-vote" => self.start_vote(args).await?,
            "vote-mod" => self.vote_mod(sender, args).await?,
            "mod-result" => self.mod_result(args).await?,
            "comment" => self.comment(sender, args).await?,
            "commit" => self.commit(sender, args).await?,
            "close" => self.close(args).await?,
            "finalize" => self.finalize(args).await?,
            "requirements" => self.requirements(args).await?,
            "proposal" => self.show_proposal(args).await?,
            "help" => self.get_help(args.first().map(String::as_str)),
            "version" => format!("leviatan-bot v{}", env!("CARGO_PKG_VERSION")),
            other => format!("Command {} not implemented", other),
        };
        Ok(Some(reply))
    }

    pub fn get_help(&self, command: Option<&str>) -> String {
        if let Some(name) = command {
            if let Some(cmd) = self.registry.find(name) {
                let mut help = format!(
                    "{}{} - {}",
                    self.prefix,
                    cmd.name,
                    cmd.description.as_deref().unwrap_or("No description")
                );
                if let Some(usage) = &cmd.usage {
                    help.push_str(&format!("\nUsage: {}{}", self.prefix, usage));
                }
                if !cmd.aliases.is_empty() {
                    help.push_str(&format!("\nAliases: {}", cmd.aliases.join(", ")));
                }
                return help;
            }
            return format!("Command {}{} not found", self.prefix, name);
        }

        // List all commands
        let mut help = "Available commands:\n".to_string();
        for cmd in self.registry.all() {
            help.push_str(&format!(
                "  {}{} - {}\n",
                self.prefix,
                cmd.name,
                cmd.description.as_deref().unwrap_or("")
            ));
        }
        help
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn register_voter(&self, sender: Option<&str>) -> Result<String, CommandError> {
        let voter = sender.ok_or(CommandError::NoSender)?;
        if self.engine.add_voter(voter).await? {
            Ok(format!("Welcome {}, you have 1000 points", voter))
        } else {
            Ok(format!("{} is already registered", voter))
        }
    }

    async fn delegate(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let from = sender.ok_or(CommandError::NoSender)?;
        let to = arg(args, 0, "voter")?;
        let points = parse_points(arg(args, 1, "points")?)?;
        let subdelegable = args
            .get(2)
            .map(|flag| matches!(flag.to_lowercase().as_str(), "sub" | "subdelegable" | "true" | "si" | "sí"))
            .unwrap_or(false);

        let resolved = self.engine.delegate(from, to, points, subdelegable).await?;
        let mut reply = format!("Delegated {} points to {}", points, to);
        if subdelegable {
            reply.push_str(" (subdelegable)");
        }
        for cycle in resolved {
            let _ = write!(
                reply,
                "\nCycle {} resolved, {} points returned to {}",
                cycle.voters.join(" -> "),
                cycle.points,
                cycle.voters.first().map(String::as_str).unwrap_or(from)
            );
        }
        Ok(reply)
    }

    async fn subdelegate(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let from = sender.ok_or(CommandError::NoSender)?;
        let to = arg(args, 0, "voter")?;
        let points = parse_points(arg(args, 1, "points")?)?;
        self.engine.subdelegate(from, to, points).await?;
        Ok(format!("Subdelegated {} points to {}", points, to))
    }

    async fn revoke(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let from = sender.ok_or(CommandError::NoSender)?;
        let to = arg(args, 0, "voter")?;
        let recovered = self.engine.revoke(from, to).await?;
        Ok(format!("Revoked delegation to {}, {} points recovered", to, recovered))
    }

    async fn profile(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let voter = match args.first() {
            Some(id) => id.as_str(),
            None => sender.ok_or(CommandError::NoSender)?,
        };
        let snapshot = self
            .engine
            .get_voter_snapshot(voter)
            .await
            .ok_or_else(|| CommandError::InvalidArgs(format!("unknown voter {}", voter)))?;
        Ok(render_profile(&snapshot))
    }

    async fn propose(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let owner = sender.ok_or(CommandError::NoSender)?;
        let title = arg(args, 0, "title")?;

        let mut existing = Vec::new();
        let mut new = Vec::new();
        for entry in &args[1..] {
            let (id, text) = entry
                .split_once('=')
                .ok_or_else(|| CommandError::InvalidArgs(format!("expected <article>=<text>, got {}", entry)))?;
            match id.strip_prefix('+') {
                Some(new_id) => new.push(ProposedArticle::new(new_id, text)),
                None => existing.push(ProposedArticle::new(id, text)),
            }
        }

        let id = self.engine.create_proposal(owner, title, existing, new).await?;
        let proposal = self.engine.proposal(&id).await;
        let governing = proposal
            .as_ref()
            .and_then(|p| p.governing_article.clone())
            .unwrap_or_else(|| "-".to_string());
        let (required, participation) = proposal
            .map(|p| (p.required_voters.to_string(), p.min_participation.to_string()))
            .unwrap_or_default();
        Ok(format!(
            "Proposal {} created (governing article {}, required support {}, minimum participation {})",
            id, governing, required, participation
        ))
    }

    async fn advance(&self, args: &[String]) -> Result<String, CommandError> {
        let proposal_id = arg(args, 0, "proposal")?;
        let target: ProposalState = arg(args, 1, "state")?
            .parse()
            .map_err(CommandError::InvalidArgs)?;
        self.engine.transition(proposal_id, target).await?;
        Ok(format!("Proposal {} is now {}", proposal_id, target))
    }

    async fn support(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let voter = sender.ok_or(CommandError::NoSender)?;
        let proposal_id = arg(args, 0, "proposal")?;
        if self.engine.support(proposal_id, voter).await? {
            Ok(format!("{} now supports {}", voter, proposal_id))
        } else {
            Ok(format!("{} already backs {}", voter, proposal_id))
        }
    }

    async fn modify(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let author = sender.ok_or(CommandError::NoSender)?;
        let proposal_id = arg(args, 0, "proposal")?;
        let article_id = arg(args, 1, "article")?;
        let changes = rest(args, 2, "changes")?;
        let mod_id = self
            .engine
            .add_modification(proposal_id, article_id, author, &changes)
            .await?;
        Ok(format!("Modification {} proposed on article {}", mod_id, article_id))
    }

    async fn start_vote(&self, args: &[String]) -> Result<String, CommandError> {
        let proposal_id = arg(args, 0, "proposal")?;
        let mod_id = arg(args, 1, "modification")?;
        let duration = match args.get(2) {
            Some(hours) => Some(chrono::Duration::hours(
                hours
                    .parse::<i64>()
                    .map_err(|_| CommandError::InvalidArgs(format!("invalid hours: {}", hours)))?,
            )),
            None => None,
        };
        let deadline = self
            .engine
            .start_modification_vote(proposal_id, mod_id, duration)
            .await?;
        Ok(format!("Voting on {} open until {}", mod_id, deadline.format("%Y-%m-%d %H:%M UTC")))
    }

    async fn vote_mod(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let voter = sender.ok_or(CommandError::NoSender)?;
        let proposal_id = arg(args, 0, "proposal")?;
        let mod_id = arg(args, 1, "modification")?;
        let points = parse_points(arg(args, 2, "points")?)?;
        self.engine
            .vote_modification(proposal_id, mod_id, voter, points)
            .await?;
        Ok(format!("Voted {} points on {}", points, mod_id))
    }

    async fn mod_result(&self, args: &[String]) -> Result<String, CommandError> {
        let proposal_id = arg(args, 0, "proposal")?;
        let mod_id = arg(args, 1, "modification")?;
        let result = self.engine.modification_result(proposal_id, mod_id).await?;
        Ok(format!(
            "{}: {} ({} points from {} voters)",
            mod_id,
            if result.passed { "passed" } else { "not passed" },
            result.total_points,
            result.total_voters
        ))
    }

    async fn comment(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let author = sender.ok_or(CommandError::NoSender)?;
        let proposal_id = arg(args, 0, "proposal")?;
        let mod_id = arg(args, 1, "modification")?;
        let content = rest(args, 2, "text")?;
        self.engine.add_comment(proposal_id, mod_id, author, &content).await?;
        Ok(format!("Comment added to {}", mod_id))
    }

    async fn commit(&self, sender: Option<&str>, args: &[String]) -> Result<String, CommandError> {
        let voter = sender.ok_or(CommandError::NoSender)?;
        let proposal_id = arg(args, 0, "proposal")?;
        let group: Vec<String> = arg(args, 1, "articles")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let points = parse_points(arg(args, 2, "points")?)?;
        let support = match args.get(3).map(|s| s.to_lowercase()) {
            None => true,
            Some(side) if matches!(side.as_str(), "for" | "yes" | "si" | "sí" | "favor") => true,
            Some(side) if matches!(side.as_str(), "against" | "no" | "contra") => false,
            Some(side) => return Err(CommandError::InvalidArgs(format!("unknown side: {}", side))),
        };

        self.engine
            .commit_points(proposal_id, voter, &group, points, support)
            .await?;
        Ok(format!(
            "Committed {} points {} {} on articles {}",
            points,
            if support { "for" } else { "against" },
            proposal_id,
            group.join(", ")
        ))
    }

    async fn close(&self, args: &[String]) -> Result<String, CommandError> {
        let proposal_id = arg(args, 0, "proposal")?;
        if self.engine.close_if_eligible(proposal_id).await? {
            Ok(format!("Proposal {} approved", proposal_id))
        } else {
            Ok(format!("Proposal {} cannot be closed yet", proposal_id))
        }
    }

    async fn finalize(&self, args: &[String]) -> Result<String, CommandError> {
        let proposal_id = arg(args, 0, "proposal")?;
        let state = self.engine.finalize(proposal_id).await?;
        Ok(format!("Proposal {} finished as {}", proposal_id, state))
    }

    async fn requirements(&self, args: &[String]) -> Result<String, CommandError> {
        let article_id = arg(args, 0, "article")?;
        let requirement = self.engine.get_article_requirements(article_id).await?;
        if requirement.is_unreachable() {
            return Ok(format!("Article {} cannot be modified", article_id));
        }
        Ok(format!(
            "Article {}: required support {}, minimum participation {}",
            article_id, requirement.required_voters, requirement.min_participation
        ))
    }

    async fn show_proposal(&self, args: &[String]) -> Result<String, CommandError> {
        let proposal_id = arg(args, 0, "proposal")?;
        let proposal = self
            .engine
            .proposal(proposal_id)
            .await
            .ok_or_else(|| CommandError::InvalidArgs(format!("unknown proposal {}", proposal_id)))?;
        let tally = proposal.tally();

        let mut out = format!("{} \"{}\" by {} [{}]", proposal.id, proposal.title, proposal.owner_id, proposal.state);
        let _ = write!(out, "\nArticles: {}", proposal.article_ids().join(", "));
        let _ = write!(
            out,
            "\nSupport {} / {} required, participation {} / {} minimum",
            tally.support,
            proposal.required_voters,
            tally.participation(),
            proposal.min_participation
        );
        if let Some(deadline) = proposal.deadline {
            let _ = write!(out, "\nDeadline: {}", deadline.format("%Y-%m-%d %H:%M UTC"));
        }
        for modification in proposal.debate.modifications.values() {
            let _ = write!(
                out,
                "\n  {} on article {} by {} [{}], {} votes, {} comments",
                modification.id,
                modification.article_id,
                modification.author_id,
                modification.state,
                modification.votes.len(),
                modification.comments.len()
            );
        }
        Ok(out)
    }
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str, CommandError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| CommandError::InvalidArgs(format!("missing <{}>", name)))
}

/// Remaining arguments joined back into one string
fn rest(args: &[String], from: usize, name: &str) -> Result<String, CommandError> {
    if args.len() <= from {
        return Err(CommandError::InvalidArgs(format!("missing <{}>", name)));
    }
    Ok(args[from..].join(" "))
}

fn parse_points(raw: &str) -> Result<i64, CommandError> {
    raw.parse::<i64>()
        .map_err(|_| CommandError::InvalidArgs(format!("invalid points: {}", raw)))
}

fn render_profile(voter: &VoterSnapshot) -> String {
    let mut out = format!("Profile of {}", voter.id);
    let _ = write!(out, "\nBase points: {}", voter.base);
    let _ = write!(out, "\nAvailable: {} (+{} reserved)", voter.available, voter.reserved);
    let _ = write!(
        out,
        "\nReceived: {} subdelegable, {} fixed",
        voter.subdelegable_received, voter.fixed_received
    );
    let _ = write!(out, "\nVoting power: {}", voter.voting_power);
    if !voter.delegations.is_empty() {
        out.push_str("\nDelegations:");
        for (to, entry) in &voter.delegations {
            let _ = write!(
                out,
                "\n  -> {}: {}{}",
                to,
                entry.points,
                if entry.subdelegable { " (subdelegable)" } else { "" }
            );
        }
    }
    if !voter.received.is_empty() {
        out.push_str("\nReceived from:");
        for (from, entry) in &voter.received {
            let _ = write!(out, "\n  <- {}: {}", from, entry.points);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::ManualClock;
    use crate::infrastructure::config::Config;
    use crate::infrastructure::storage::MemoryStore;
    use crate::application::messaging::MessageParser;

    async fn service() -> CommandService {
        let engine = Arc::new(Engine::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
        ));
        engine.add_article("1", "Free speech", 1.0, 100).await.unwrap();
        CommandService::new("!", engine)
    }

    async fn run(svc: &CommandService, user: &str, line: &str) -> Result<Option<String>, CommandError> {
        let message = MessageParser::new("!").parse(line, Some(user.to_string()));
        svc.handle(&message).await
    }

    #[tokio::test]
    async fn test_spanish_aliases_reach_the_engine() {
        let svc = service().await;
        run(&svc, "ana", "!registrar").await.unwrap();
        run(&svc, "luis", "!register").await.unwrap();

        let reply = run(&svc, "ana", "!delegar luis 300 sub").await.unwrap().unwrap();
        assert!(reply.contains("300"));
        let profile = run(&svc, "luis", "!perfil").await.unwrap().unwrap();
        assert!(profile.contains("300 subdelegable"));
        assert!(profile.contains("Voting power: 1300"));
    }

    #[tokio::test]
    async fn test_errors_are_reported() {
        let svc = service().await;
        assert!(matches!(
            run(&svc, "ana", "!nonsense").await,
            Err(CommandError::NotFound(_))
        ));
        assert!(matches!(
            run(&svc, "ana", "!delegate bob").await,
            Err(CommandError::InvalidArgs(_))
        ));
        // unknown voters are refused by the engine
        assert!(matches!(
            run(&svc, "ana", "!delegate bob 10").await,
            Err(CommandError::Engine(_))
        ));
        assert!(run(&svc, "ana", "just chatting").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_propose_and_show() {
        let svc = service().await;
        run(&svc, "ana", "!register").await.unwrap();
        let reply = run(&svc, "ana", r#"!propose "Reform" 1="Speech for all" +7="Right to rest""#)
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("prop_1"));
        assert!(reply.contains("governing article 1"));

        let shown = run(&svc, "ana", "!propuesta prop_1").await.unwrap().unwrap();
        assert!(shown.contains("Articles: 1, 7"));
        assert!(shown.contains("[draft]"));

        let zero = run(&svc, "ana", "!requisitos 0").await.unwrap().unwrap();
        assert!(zero.contains("cannot be modified"));
    }

    #[tokio::test]
    async fn test_supporters_may_modify() {
        let svc = service().await;
        for user in ["ana", "luis", "eva"] {
            run(&svc, user, "!register").await.unwrap();
        }
        run(&svc, "ana", r#"!propose "Reform" 1="Speech for all""#).await.unwrap();
        run(&svc, "ana", "!advance prop_1 gathering").await.unwrap();

        let reply = run(&svc, "luis", "!apoyar prop_1").await.unwrap().unwrap();
        assert!(reply.contains("luis now supports prop_1"));
        let again = run(&svc, "luis", "!support prop_1").await.unwrap().unwrap();
        assert!(again.contains("already"));

        run(&svc, "ana", "!advance prop_1 debate").await.unwrap();
        let reply = run(&svc, "luis", "!modificar prop_1 1 shorter wording").await.unwrap().unwrap();
        assert!(reply.contains("mod_1"));
        assert!(matches!(
            run(&svc, "eva", "!modify prop_1 1 longer wording").await,
            Err(CommandError::Engine(_))
        ));
        assert!(matches!(
            run(&svc, "eva", "!support prop_1").await,
            Err(CommandError::Engine(_))
        ));
    }
}
