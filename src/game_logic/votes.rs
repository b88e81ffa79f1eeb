use serde::Serialize;
use std::collections::HashSet;

/// Votes required to abort: strictly more than three fifths of the
/// connected players.
pub fn quorum_needed(connected_players: usize) -> usize {
    if connected_players == 0 {
        return 0;
    }
    connected_players * 3 / 5 + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    Round,
    Match,
}

/// Player keys that voted for one kind of abort.
#[derive(Debug, Clone, Default)]
pub struct VotePool {
    voters: HashSet<String>,
}

impl VotePool {
    /// Records a vote. Returns false when the player had already voted.
    pub fn cast(&mut self, player_key: &str) -> bool {
        self.voters.insert(player_key.to_string())
    }

    pub fn count(&self) -> usize {
        self.voters.len()
    }

    pub fn clear(&mut self) {
        self.voters.clear();
    }

    pub fn tally(&self, connected_players: usize) -> VoteTally {
        let needed = quorum_needed(connected_players);
        let votes = self.count();
        VoteTally {
            votes,
            needed,
            aborted: needed > 0 && votes >= needed,
        }
    }
}

/// Result of a vote, echoed back in the acknowledgment.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteTally {
    pub votes: usize,
    pub needed: usize,
    pub aborted: bool,
}
