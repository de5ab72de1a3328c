use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use mailsieve_core::{CampaignId, RecipientPathEntry};

/// One recipient's ordered campaign path, grouped from its row entries.
#[derive(Debug, Clone)]
pub struct RecipientPathView {
    pub recipient: String,
    pub campaigns: Vec<CampaignId>,
    pub is_new_user: bool,
}

/// Group path rows (pre-sorted by recipient then sequence) into one view
/// per recipient.
#[must_use]
pub fn group_paths(entries: &[RecipientPathEntry]) -> Vec<RecipientPathView> {
    let mut views: Vec<RecipientPathView> = Vec::new();
    for entry in entries {
        match views.last_mut() {
            Some(view) if view.recipient == entry.recipient => {
                view.campaigns.push(entry.campaign_id);
                view.is_new_user |= entry.is_new_user;
            }
            _ => views.push(RecipientPathView {
                recipient: entry.recipient.clone(),
                campaigns: vec![entry.campaign_id],
                is_new_user: entry.is_new_user,
            }),
        }
    }
    views
}

/// A distinct-recipient count of one campaign-to-campaign transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignTransition {
    pub from: CampaignId,
    pub to: CampaignId,
    pub recipient_count: i64,
    /// `recipient_count / total recipients` of the analyzed path set.
    pub ratio: f64,
}

/// A unique full-path branch shared by some recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathBranch {
    pub campaign_ids: Vec<CampaignId>,
    pub recipient_count: i64,
    pub percentage: f64,
}

/// Tiered branch breakdown of a merchant's paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchAnalysis {
    /// Branches at or above the main-path threshold (top 10).
    pub main_paths: Vec<PathBranch>,
    /// Branches between 1% and the main-path threshold (top 20).
    pub secondary_paths: Vec<PathBranch>,
    /// Branches touching at least one valuable campaign (top 20).
    pub valuable_paths: Vec<PathBranch>,
    pub total_recipients: i64,
}

/// A neighbor of a valuable campaign weighted by distinct recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborCount {
    pub campaign_id: CampaignId,
    pub recipient_count: i64,
}

/// Predecessor/successor context of one valuable campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuableCampaignReport {
    pub campaign_id: CampaignId,
    pub dag_level: u32,
    /// Top 5 campaigns recipients arrive from.
    pub predecessors: Vec<NeighborCount>,
    /// Top 5 campaigns recipients continue to.
    pub successors: Vec<NeighborCount>,
}

/// Campaign transition graph held as an index arena: campaign ids are
/// interned to `usize` node indices, edges are index pairs. Nothing in
/// here outlives the analysis call.
pub struct PathGraph {
    nodes: Vec<CampaignId>,
    index: HashMap<CampaignId, usize>,
    out_edges: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
}

impl PathGraph {
    /// Build the transition multigraph: one node per campaign, one edge
    /// per immediately-consecutive pair in any recipient's path.
    #[must_use]
    pub fn from_paths(paths: &[RecipientPathView]) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            out_edges: Vec::new(),
            in_degree: Vec::new(),
        };

        for path in paths {
            for campaign in &path.campaigns {
                graph.intern(*campaign);
            }
            for pair in path.campaigns.windows(2) {
                let from = graph.index[&pair[0]];
                let to = graph.index[&pair[1]];
                graph.out_edges[from].push(to);
                graph.in_degree[to] += 1;
            }
        }
        graph
    }

    fn intern(&mut self, campaign: CampaignId) -> usize {
        if let Some(&index) = self.index.get(&campaign) {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(campaign);
        self.index.insert(campaign, index);
        self.out_edges.push(Vec::new());
        self.in_degree.push(0);
        index
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Assign DAG levels by Kahn-style BFS.
    ///
    /// Seeds start at level 1; each edge relaxes its target to
    /// `max(existing, source + 1)`. Without explicit seeds (or when none
    /// of them occur in the graph) the zero-in-degree nodes seed the
    /// walk. Nodes the BFS never settles (cycles, isolated remnants) get
    /// level 1.
    #[must_use]
    pub fn dag_levels(&self, seeds: Option<&[CampaignId]>) -> HashMap<CampaignId, u32> {
        let n = self.nodes.len();
        let mut level = vec![0u32; n];
        let mut in_degree = self.in_degree.clone();
        let mut enqueued = vec![false; n];
        let mut queue = VecDeque::new();

        let seed_indices: Vec<usize> = match seeds {
            Some(seeds) if seeds.iter().any(|s| self.index.contains_key(s)) => seeds
                .iter()
                .filter_map(|s| self.index.get(s).copied())
                .collect(),
            _ => (0..n).filter(|&i| in_degree[i] == 0).collect(),
        };

        for index in seed_indices {
            if !enqueued[index] {
                enqueued[index] = true;
                level[index] = 1;
                queue.push_back(index);
            }
        }

        while let Some(current) = queue.pop_front() {
            for &next in &self.out_edges[current] {
                level[next] = level[next].max(level[current] + 1);
                in_degree[next] = in_degree[next].saturating_sub(1);
                if in_degree[next] == 0 && !enqueued[next] {
                    enqueued[next] = true;
                    queue.push_back(next);
                }
            }
        }

        self.nodes
            .iter()
            .enumerate()
            .map(|(index, campaign)| (*campaign, level[index].max(1)))
            .collect()
    }
}

/// Count distinct recipients per consecutive `(from, to)` campaign pair,
/// sorted by descending recipient count. Ratios are relative to the total
/// recipient count of the path set.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn transitions(paths: &[RecipientPathView]) -> Vec<CampaignTransition> {
    let total = paths.len() as i64;
    let mut counts: HashMap<(CampaignId, CampaignId), i64> = HashMap::new();
    for path in paths {
        for pair in path.campaigns.windows(2) {
            *counts.entry((pair[0], pair[1])).or_insert(0) += 1;
        }
    }

    let mut out: Vec<CampaignTransition> = counts
        .into_iter()
        .map(|((from, to), recipient_count)| CampaignTransition {
            from,
            to,
            recipient_count,
            ratio: if total > 0 {
                recipient_count as f64 / total as f64
            } else {
                0.0
            },
        })
        .collect();
    out.sort_by(|a, b| {
        b.recipient_count
            .cmp(&a.recipient_count)
            .then_with(|| (a.from, a.to).cmp(&(b.from, b.to)))
    });
    out
}

/// Tier the unique full-path branches of a path set.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn branch_analysis(
    paths: &[RecipientPathView],
    valuable: &HashSet<CampaignId>,
    main_path_threshold: f64,
) -> BranchAnalysis {
    let total = paths.len() as i64;
    let mut counts: HashMap<Vec<CampaignId>, i64> = HashMap::new();
    for path in paths {
        *counts.entry(path.campaigns.clone()).or_insert(0) += 1;
    }

    let mut branches: Vec<PathBranch> = counts
        .into_iter()
        .map(|(campaign_ids, recipient_count)| PathBranch {
            campaign_ids,
            recipient_count,
            percentage: if total > 0 {
                recipient_count as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        })
        .collect();
    branches.sort_by(|a, b| {
        b.recipient_count
            .cmp(&a.recipient_count)
            .then_with(|| a.campaign_ids.cmp(&b.campaign_ids))
    });

    let main_paths: Vec<PathBranch> = branches
        .iter()
        .filter(|b| b.percentage >= main_path_threshold)
        .take(10)
        .cloned()
        .collect();
    let secondary_paths: Vec<PathBranch> = branches
        .iter()
        .filter(|b| b.percentage >= 1.0 && b.percentage < main_path_threshold)
        .take(20)
        .cloned()
        .collect();
    let valuable_paths: Vec<PathBranch> = branches
        .iter()
        .filter(|b| b.campaign_ids.iter().any(|id| valuable.contains(id)))
        .take(20)
        .cloned()
        .collect();

    BranchAnalysis {
        main_paths,
        secondary_paths,
        valuable_paths,
        total_recipients: total,
    }
}

/// Attach top-5 predecessors and successors (by distinct recipients) and
/// the DAG level to each valuable campaign.
#[must_use]
pub fn valuable_campaign_reports(
    paths: &[RecipientPathView],
    valuable: &[CampaignId],
    levels: &HashMap<CampaignId, u32>,
) -> Vec<ValuableCampaignReport> {
    let transitions = transitions(paths);

    valuable
        .iter()
        .map(|&campaign_id| {
            let mut predecessors: Vec<NeighborCount> = transitions
                .iter()
                .filter(|t| t.to == campaign_id)
                .map(|t| NeighborCount {
                    campaign_id: t.from,
                    recipient_count: t.recipient_count,
                })
                .collect();
            let mut successors: Vec<NeighborCount> = transitions
                .iter()
                .filter(|t| t.from == campaign_id)
                .map(|t| NeighborCount {
                    campaign_id: t.to,
                    recipient_count: t.recipient_count,
                })
                .collect();
            predecessors.truncate(5);
            successors.truncate(5);

            ValuableCampaignReport {
                campaign_id,
                dag_level: levels.get(&campaign_id).copied().unwrap_or(1),
                predecessors,
                successors,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(recipient: &str, campaigns: &[CampaignId]) -> RecipientPathView {
        RecipientPathView {
            recipient: recipient.to_owned(),
            campaigns: campaigns.to_vec(),
            is_new_user: false,
        }
    }

    fn ids(n: usize) -> Vec<CampaignId> {
        (0..n).map(|_| CampaignId::new()).collect()
    }

    #[test]
    fn levels_follow_longest_path() {
        let c = ids(4);
        // a → b → d and a → c → d: d settles at level 3.
        let paths = vec![
            path("r1", &[c[0], c[1], c[3]]),
            path("r2", &[c[0], c[2], c[3]]),
        ];
        let graph = PathGraph::from_paths(&paths);
        let levels = graph.dag_levels(None);
        assert_eq!(levels[&c[0]], 1);
        assert_eq!(levels[&c[1]], 2);
        assert_eq!(levels[&c[2]], 2);
        assert_eq!(levels[&c[3]], 3);
    }

    #[test]
    fn cycle_members_fall_back_to_level_one() {
        let c = ids(2);
        // a → b and b → a: no zero-in-degree node exists.
        let paths = vec![path("r1", &[c[0], c[1]]), path("r2", &[c[1], c[0]])];
        let graph = PathGraph::from_paths(&paths);
        let levels = graph.dag_levels(None);
        assert_eq!(levels[&c[0]], 1);
        assert_eq!(levels[&c[1]], 1);
    }

    #[test]
    fn explicit_seeds_shift_levels() {
        let c = ids(3);
        let paths = vec![path("r1", &[c[0], c[1], c[2]])];
        let graph = PathGraph::from_paths(&paths);

        let from_mid = graph.dag_levels(Some(&[c[1]]));
        assert_eq!(from_mid[&c[1]], 1);
        assert_eq!(from_mid[&c[2]], 2);
        // Unreached head falls back to level 1.
        assert_eq!(from_mid[&c[0]], 1);

        // Unknown seeds behave like no seeds.
        let unknown = graph.dag_levels(Some(&[CampaignId::new()]));
        assert_eq!(unknown[&c[0]], 1);
        assert_eq!(unknown[&c[2]], 3);
    }

    #[test]
    fn transitions_count_distinct_recipients() {
        let c = ids(3);
        let paths = vec![
            path("r1", &[c[0], c[1]]),
            path("r2", &[c[0], c[1], c[2]]),
            path("r3", &[c[0], c[2]]),
        ];
        let result = transitions(&paths);
        assert_eq!(result[0].from, c[0]);
        assert_eq!(result[0].to, c[1]);
        assert_eq!(result[0].recipient_count, 2);
        assert!((result[0].ratio - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn branches_are_tiered_by_share() {
        let c = ids(3);
        let mut paths = Vec::new();
        // 195 recipients on the main branch, 4 on a secondary branch at
        // exactly 2%, 1 below the 1% floor.
        for i in 0..195 {
            paths.push(path(&format!("main{i}"), &[c[0], c[1]]));
        }
        for i in 0..4 {
            paths.push(path(&format!("side{i}"), &[c[0], c[2]]));
        }
        paths.push(path("rare", &[c[2]]));

        let valuable: HashSet<CampaignId> = [c[2]].into_iter().collect();
        let analysis = branch_analysis(&paths, &valuable, 5.0);

        assert_eq!(analysis.total_recipients, 200);
        assert_eq!(analysis.main_paths.len(), 1);
        assert_eq!(analysis.main_paths[0].recipient_count, 195);
        assert_eq!(analysis.secondary_paths.len(), 1);
        assert_eq!(analysis.secondary_paths[0].recipient_count, 4);
        // Branches touching c2 qualify as valuable regardless of share.
        assert_eq!(analysis.valuable_paths.len(), 2);
    }

    #[test]
    fn valuable_reports_cap_neighbors_at_five() {
        let hub = CampaignId::new();
        let feeders = ids(7);
        let mut paths = Vec::new();
        for (i, feeder) in feeders.iter().enumerate() {
            for j in 0..=i {
                paths.push(path(&format!("r{i}-{j}"), &[*feeder, hub]));
            }
        }

        let graph = PathGraph::from_paths(&paths);
        let levels = graph.dag_levels(None);
        let reports = valuable_campaign_reports(&paths, &[hub], &levels);

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].predecessors.len(), 5);
        // Sorted by recipient count: the heaviest feeder first.
        assert_eq!(reports[0].predecessors[0].recipient_count, 7);
        assert!(reports[0].successors.is_empty());
        assert_eq!(reports[0].dag_level, 2);
    }
}
