use std::collections::{HashMap, HashSet};

/// 依赖图的内存快照，边方向为 任务 → 前置任务
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<i64, HashSet<i64>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, task_id: i64, depends_on: i64) {
        self.edges.entry(task_id).or_default().insert(depends_on);
    }

    pub fn set_dependencies(&mut self, task_id: i64, depends_on: impl IntoIterator<Item = i64>) {
        self.edges.insert(task_id, depends_on.into_iter().collect());
    }

    pub fn dependencies_of(&self, task_id: i64) -> impl Iterator<Item = i64> + '_ {
        self.edges
            .get(&task_id)
            .into_iter()
            .flat_map(|deps| deps.iter().copied())
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    /// 深度优先搜索从 `from` 到 `to` 的路径
    pub fn find_path(&self, from: i64, to: i64) -> Option<Vec<i64>> {
        let mut visited = HashSet::new();
        let mut stack: Vec<(i64, Vec<i64>)> = vec![(from, vec![from])];

        while let Some((node, path)) = stack.pop() {
            if node == to {
                return Some(path);
            }
            if !visited.insert(node) {
                continue;
            }
            let mut next: Vec<i64> = self
                .dependencies_of(node)
                .filter(|n| !visited.contains(n))
                .collect();
            // 保证遍历顺序稳定
            next.sort_unstable_by(|a, b| b.cmp(a));
            for n in next {
                let mut extended = path.clone();
                extended.push(n);
                stack.push((n, extended));
            }
        }
        None
    }

    /// 插入 `task_id → depends_on` 是否会形成环
    ///
    /// 自依赖视为环；否则检查 `depends_on` 能否沿现有边回到 `task_id`。
    pub fn would_create_cycle(&self, task_id: i64, depends_on: i64) -> bool {
        task_id == depends_on || self.find_path(depends_on, task_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_edge_creates_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(1, 2);
        assert!(graph.would_create_cycle(2, 1));
        assert!(!graph.would_create_cycle(3, 1));
    }

    #[test]
    fn test_transitive_cycle_detected() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 4);

        assert!(graph.would_create_cycle(4, 1));
        assert_eq!(graph.find_path(1, 4), Some(vec![1, 2, 3, 4]));
        assert!(!graph.would_create_cycle(1, 4));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let graph = DependencyGraph::new();
        assert!(graph.would_create_cycle(7, 7));
    }

    #[test]
    fn test_diamond_is_not_cycle() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(1, [2, 3]);
        graph.add_edge(2, 4);
        graph.add_edge(3, 4);

        assert!(!graph.would_create_cycle(1, 4));
        assert!(graph.would_create_cycle(4, 1));
        assert_eq!(graph.edge_count(), 4);
    }
}
