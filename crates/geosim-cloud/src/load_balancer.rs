//! Load balancers spreading queued items over schedulers.

/// Trait for spreading a batch of queued item ids over `n` schedulers.
/// Implementations keep their own cursor so distribution is stable across
/// calls.
pub trait LoadBalancer {
    /// Splits the items into one bucket per scheduler; empty buckets mean the
    /// scheduler receives nothing this round.
    fn assign(&mut self, items: Vec<u32>, scheduler_num: usize) -> Vec<Vec<u32>>;

    /// Delay charged per balancing round, ms.
    fn cost_time(&self) -> f64;
}

/// Builds a load balancer from its configuration token.
pub fn load_balancer_resolver(token: &str, batch_size: usize, cost_time: f64) -> Option<Box<dyn LoadBalancer>> {
    match token {
        "Round" => Some(Box::new(RoundLoadBalancer::new(cost_time))),
        "Batch" => Some(Box::new(BatchLoadBalancer::new(batch_size, cost_time))),
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Deals items one by one over the schedulers, continuing from where the
/// previous round stopped.
pub struct RoundLoadBalancer {
    next: usize,
    cost_time: f64,
}

impl RoundLoadBalancer {
    pub fn new(cost_time: f64) -> Self {
        Self { next: 0, cost_time }
    }
}

impl LoadBalancer for RoundLoadBalancer {
    fn assign(&mut self, items: Vec<u32>, scheduler_num: usize) -> Vec<Vec<u32>> {
        let mut buckets = vec![Vec::new(); scheduler_num];
        for item in items {
            buckets[self.next % scheduler_num].push(item);
            self.next = (self.next + 1) % scheduler_num;
        }
        buckets
    }

    fn cost_time(&self) -> f64 {
        self.cost_time
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Fills one scheduler up to the batch size before moving to the next.
pub struct BatchLoadBalancer {
    batch_size: usize,
    next: usize,
    cost_time: f64,
}

impl BatchLoadBalancer {
    pub fn new(batch_size: usize, cost_time: f64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            next: 0,
            cost_time,
        }
    }
}

impl LoadBalancer for BatchLoadBalancer {
    fn assign(&mut self, items: Vec<u32>, scheduler_num: usize) -> Vec<Vec<u32>> {
        let mut buckets = vec![Vec::new(); scheduler_num];
        for chunk in items.chunks(self.batch_size) {
            buckets[self.next % scheduler_num].extend_from_slice(chunk);
            self.next = (self.next + 1) % scheduler_num;
        }
        buckets
    }

    fn cost_time(&self) -> f64 {
        self.cost_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_balancer_continues_across_calls() {
        let mut lb = RoundLoadBalancer::new(0.1);
        let buckets = lb.assign(vec![1, 2, 3], 2);
        assert_eq!(buckets, vec![vec![1, 3], vec![2]]);
        let buckets = lb.assign(vec![4], 2);
        assert_eq!(buckets, vec![vec![], vec![4]]);
    }

    #[test]
    fn batch_balancer_fills_in_chunks() {
        let mut lb = BatchLoadBalancer::new(2, 0.1);
        let buckets = lb.assign(vec![1, 2, 3, 4, 5], 2);
        assert_eq!(buckets, vec![vec![1, 2, 5], vec![3, 4]]);
    }
}
