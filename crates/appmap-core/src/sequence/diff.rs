//! Structural diff of two sequence diagrams.
//!
//! Sibling lists are aligned by longest common subsequence over action
//! digests, level by level. Actions left unmatched on both sides with the
//! same digest are then paired up as moves.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::config::{clamp_candidates, DEFAULT_DIFF_CANDIDATES};
use crate::models::sha256_hex;
use crate::sequence::diagram::{Action, Actor, Diagram, DiffMode};

/// Above this many table cells the middle of a sibling list is reported as
/// replaced instead of aligned.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// How many base subtrees are compared when several could be the origin
    /// of a moved head subtree.
    pub max_candidates: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            max_candidates: DEFAULT_DIFF_CANDIDATES,
        }
    }
}

impl DiffOptions {
    pub fn with_max_candidates(mut self, max_candidates: i64) -> Self {
        self.max_candidates = clamp_candidates(max_candidates);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    AdvanceBoth,
    DeleteLeft,
    InsertRight,
    Moved,
}

/// One step of the merged walk. `base` and `head` are action positions in
/// the respective diagrams; `parent` is the position of the enclosing move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub move_type: MoveType,
    pub base: Option<usize>,
    pub head: Option<usize>,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DiffResult {
    pub base: Diagram,
    pub head: Diagram,
    /// Moves in pre-order of the merged tree. Deleted and inserted subtrees
    /// appear once, at their root.
    pub moves: Vec<Move>,
}

impl DiffResult {
    pub fn changes(&self) -> impl Iterator<Item = &Move> + '_ {
        self.moves
            .iter()
            .filter(|m| m.move_type != MoveType::AdvanceBoth)
    }

    pub fn is_unchanged(&self) -> bool {
        self.changes().next().is_none()
    }
}

struct FlatNode<'a> {
    digest: String,
    children: &'a [usize],
    /// Digest of the action together with all of its descendants.
    subtree: String,
    size: usize,
}

struct Side<'a> {
    nodes: Vec<FlatNode<'a>>,
    roots: &'a [usize],
}

impl<'a> Side<'a> {
    fn new(diagram: &'a Diagram) -> Self {
        let mut nodes: Vec<FlatNode<'a>> = diagram
            .actions()
            .iter()
            .enumerate()
            .map(|(position, action)| FlatNode {
                digest: if action.digest.is_empty() {
                    action.compute_digest()
                } else {
                    action.digest.clone()
                },
                children: diagram.children(position),
                subtree: String::new(),
                size: 1,
            })
            .collect();

        // Children follow their parent.
        for index in (0..nodes.len()).rev() {
            let mut text = nodes[index].digest.clone();
            let mut size = 1;
            for &child in nodes[index].children {
                text.push(':');
                text.push_str(&nodes[child].subtree);
                size += nodes[child].size;
            }
            nodes[index].subtree = sha256_hex(text);
            nodes[index].size = size;
        }
        Self {
            nodes,
            roots: diagram.roots(),
        }
    }

    fn digest(&self, index: usize) -> &str {
        &self.nodes[index].digest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Both(usize, usize),
    Moved(usize, usize),
    Left(usize),
    Right(usize),
}

type Alignment = BTreeMap<Option<(usize, usize)>, Vec<Step>>;

/// Align two sibling lists by action digest.
fn align_lists(base: &Side<'_>, head: &Side<'_>, b: &[usize], h: &[usize]) -> Vec<Step> {
    let same = |x: usize, y: usize| base.digest(x) == head.digest(y);

    let mut prefix = 0;
    while prefix < b.len() && prefix < h.len() && same(b[prefix], h[prefix]) {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < b.len() - prefix
        && suffix < h.len() - prefix
        && same(b[b.len() - 1 - suffix], h[h.len() - 1 - suffix])
    {
        suffix += 1;
    }

    let mut steps: Vec<Step> = (0..prefix).map(|i| Step::Both(b[i], h[i])).collect();
    let mid_b = &b[prefix..b.len() - suffix];
    let mid_h = &h[prefix..h.len() - suffix];
    let (n, m) = (mid_b.len(), mid_h.len());

    if (n + 1) * (m + 1) > MAX_LCS_CELLS {
        debug!("Sibling lists of {n} and {m} actions are too long to align");
        steps.extend(mid_b.iter().map(|&x| Step::Left(x)));
        steps.extend(mid_h.iter().map(|&y| Step::Right(y)));
    } else {
        // lcs[i * (m + 1) + j] is the LCS length of mid_b[i..] and mid_h[j..].
        let width = m + 1;
        let mut lcs = vec![0u32; (n + 1) * width];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                lcs[i * width + j] = if same(mid_b[i], mid_h[j]) {
                    lcs[(i + 1) * width + j + 1] + 1
                } else {
                    lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
                };
            }
        }
        let (mut i, mut j) = (0, 0);
        while i < n && j < m {
            if same(mid_b[i], mid_h[j]) {
                steps.push(Step::Both(mid_b[i], mid_h[j]));
                i += 1;
                j += 1;
            } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
                steps.push(Step::Left(mid_b[i]));
                i += 1;
            } else {
                steps.push(Step::Right(mid_h[j]));
                j += 1;
            }
        }
        steps.extend(mid_b[i..].iter().map(|&x| Step::Left(x)));
        steps.extend(mid_h[j..].iter().map(|&y| Step::Right(y)));
    }

    steps.extend((0..suffix).map(|k| {
        Step::Both(b[b.len() - suffix + k], h[h.len() - suffix + k])
    }));
    steps
}

/// Align `b_list` against `h_list` under `key`, then every matched pair
/// below it.
fn align_from(
    base: &Side<'_>,
    head: &Side<'_>,
    key: Option<(usize, usize)>,
    b_list: &[usize],
    h_list: &[usize],
    alignment: &mut Alignment,
) {
    let mut work = vec![(key, b_list.to_vec(), h_list.to_vec())];
    while let Some((key, b, h)) = work.pop() {
        let steps = align_lists(base, head, &b, &h);
        for step in &steps {
            if let Step::Both(x, y) | Step::Moved(x, y) = *step {
                work.push((
                    Some((x, y)),
                    base.nodes[x].children.to_vec(),
                    head.nodes[y].children.to_vec(),
                ));
            }
        }
        alignment.insert(key, steps);
    }
}

/// Number of actions that differ between two subtrees with equal root
/// digests.
fn subtree_cost(base: &Side<'_>, head: &Side<'_>, b: usize, h: usize) -> usize {
    let mut cost = 0;
    let mut work = vec![(b, h)];
    while let Some((x, y)) = work.pop() {
        if base.nodes[x].subtree == head.nodes[y].subtree {
            continue;
        }
        let steps = align_lists(base, head, base.nodes[x].children, head.nodes[y].children);
        for step in steps {
            match step {
                Step::Both(x, y) | Step::Moved(x, y) => work.push((x, y)),
                Step::Left(x) => cost += base.nodes[x].size,
                Step::Right(y) => cost += head.nodes[y].size,
            }
        }
    }
    cost
}

/// Up to `limit` distinct candidates, chosen by a generator seeded from
/// `seed` so the same inputs always sample the same candidates.
fn sample(candidates: &[usize], seed: &str, limit: usize) -> Vec<usize> {
    let limit = limit.max(1);
    if candidates.len() <= limit {
        return candidates.to_vec();
    }
    let mut state = u64::from(crc32fast::hash(seed.as_bytes())) | 1;
    let mut pool = candidates.to_vec();
    let mut picked = Vec::with_capacity(limit);
    for _ in 0..limit {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let i = (state % pool.len() as u64) as usize;
        picked.push(pool.swap_remove(i));
    }
    picked.sort_unstable();
    picked
}

/// Pair inserted head actions with deleted base actions of the same digest.
/// Returns head position -> base position.
fn detect_moves(
    base: &Side<'_>,
    head: &Side<'_>,
    alignment: &Alignment,
    options: &DiffOptions,
) -> BTreeMap<usize, usize> {
    let mut unmatched: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut inserted: Vec<usize> = Vec::new();
    for steps in alignment.values() {
        for step in steps {
            match *step {
                Step::Left(b) => unmatched.entry(base.digest(b)).or_default().push(b),
                Step::Right(h) => inserted.push(h),
                _ => {}
            }
        }
    }
    for list in unmatched.values_mut() {
        list.sort_unstable();
    }
    inserted.sort_unstable();

    let mut moves = BTreeMap::new();
    for h in inserted {
        let Some(candidates) = unmatched.get_mut(head.digest(h)) else {
            continue;
        };
        if candidates.is_empty() {
            continue;
        }
        let sampled = sample(candidates, &head.nodes[h].subtree, options.max_candidates);
        let best = sampled
            .iter()
            .map(|&b| (subtree_cost(base, head, b, h), b))
            .min();
        if let Some((cost, b)) = best {
            debug!("Head action {h} moved from base action {b} (cost {cost})");
            candidates.retain(|&c| c != b);
            moves.insert(h, b);
        }
    }
    moves
}

/// Compare two diagrams.
pub fn diff(base: &Diagram, head: &Diagram, options: &DiffOptions) -> DiffResult {
    let base_side = Side::new(base);
    let head_side = Side::new(head);

    let mut alignment = Alignment::new();
    align_from(
        &base_side,
        &head_side,
        None,
        base_side.roots,
        head_side.roots,
        &mut alignment,
    );

    let moved = detect_moves(&base_side, &head_side, &alignment, options);
    if !moved.is_empty() {
        let moved_base: HashSet<usize> = moved.values().copied().collect();
        for steps in alignment.values_mut() {
            steps.retain(|s| !matches!(s, Step::Left(b) if moved_base.contains(b)));
            for step in steps.iter_mut() {
                if let Step::Right(h) = *step {
                    if let Some(&b) = moved.get(&h) {
                        *step = Step::Moved(b, h);
                    }
                }
            }
        }
        for (&h, &b) in &moved {
            align_from(
                &base_side,
                &head_side,
                Some((b, h)),
                base_side.nodes[b].children,
                head_side.nodes[h].children,
                &mut alignment,
            );
        }
    }

    let mut moves = Vec::new();
    let mut stack: Vec<(Option<usize>, Step)> = alignment
        .get(&None)
        .map(|steps| steps.iter().rev().map(|&s| (None, s)).collect())
        .unwrap_or_default();
    while let Some((parent, step)) = stack.pop() {
        let position = moves.len();
        let (move_type, b, h) = match step {
            Step::Both(b, h) => (MoveType::AdvanceBoth, Some(b), Some(h)),
            Step::Moved(b, h) => (MoveType::Moved, Some(b), Some(h)),
            Step::Left(b) => (MoveType::DeleteLeft, Some(b), None),
            Step::Right(h) => (MoveType::InsertRight, None, Some(h)),
        };
        moves.push(Move {
            move_type,
            base: b,
            head: h,
            parent,
        });
        if let (Some(b), Some(h)) = (b, h) {
            if let Some(children) = alignment.get(&Some((b, h))) {
                stack.extend(children.iter().rev().map(|&s| (Some(position), s)));
            }
        }
    }

    debug!(
        "Diffed {} base and {} head actions: {} moves",
        base_side.nodes.len(),
        head_side.nodes.len(),
        moves.len()
    );
    DiffResult {
        base: base.clone(),
        head: head.clone(),
        moves,
    }
}

fn annotated(action: &Action, mode: Option<DiffMode>) -> Action {
    let mut action = action.clone();
    action.diff_mode = mode;
    action
}

/// Copy the subtree of `source` rooted at `root` under `parent`, marking
/// only its root.
fn copy_subtree(
    target: &mut Diagram,
    parent: Option<usize>,
    source: &Diagram,
    root: usize,
    mode: DiffMode,
) -> usize {
    let position = target.push(parent, annotated(source.action(root), Some(mode)));
    let mut stack: Vec<(usize, usize)> =
        source.children(root).iter().rev().map(|&c| (position, c)).collect();
    while let Some((parent, child)) = stack.pop() {
        let copied = target.push(Some(parent), source.action(child).clone());
        stack.extend(source.children(child).iter().rev().map(|&c| (copied, c)));
    }
    position
}

/// One diagram holding both sides, with changed actions marked. Deleted
/// subtrees keep their base children; matched actions take the head's
/// version.
pub fn build_diff_diagram(result: &DiffResult) -> Diagram {
    let mut actors: Vec<Actor> = result.head.actors().to_vec();
    for actor in result.base.actors() {
        if !actors.iter().any(|a| a.id == actor.id) {
            actors.push(actor.clone());
        }
    }
    for (order, actor) in actors.iter_mut().enumerate() {
        actor.order = order;
    }

    let mut diagram = Diagram::new(actors);
    let mut positions: Vec<Option<usize>> = Vec::with_capacity(result.moves.len());
    for m in &result.moves {
        let parent = m.parent.and_then(|p| positions.get(p).copied().flatten());
        let position = match (m.move_type, m.base, m.head) {
            (MoveType::AdvanceBoth, _, Some(h)) if h < result.head.len() => {
                Some(diagram.push(parent, annotated(result.head.action(h), None)))
            }
            (MoveType::Moved, _, Some(h)) if h < result.head.len() => Some(diagram.push(
                parent,
                annotated(result.head.action(h), Some(DiffMode::Move)),
            )),
            (MoveType::DeleteLeft, Some(b), _) if b < result.base.len() => Some(copy_subtree(
                &mut diagram,
                parent,
                &result.base,
                b,
                DiffMode::Delete,
            )),
            (MoveType::InsertRight, _, Some(h)) if h < result.head.len() => Some(copy_subtree(
                &mut diagram,
                parent,
                &result.head,
                h,
                DiffMode::Insert,
            )),
            _ => None,
        };
        positions.push(position);
    }
    diagram
}
