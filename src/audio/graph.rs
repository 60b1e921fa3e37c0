//! Declarative routing.
//!
//! A [`GraphPlan`] is a pure description of the signal chain for one
//! environment and one set of settings: an ordered node list plus the
//! connections between them. [`SignalGraph`] compiles a plan into running DSP
//! stages and renders audio from it. Re-applying the plan already in place is
//! a no-op; applying a different one replaces the whole chain.

use tracing::{debug, warn};

use super::analyser::AnalysisTap;
use super::effects::{Chorus, ConvolutionReverb, FeedbackDelay, Phaser, Processor};
use super::voice::{Envelope, VoiceBank, VoiceId};
use crate::environment::{ChorusStage, DelaySend, PhaserStage, ReverbSend, SoundEnvironment, Waveform};
use crate::error::{HeartbeatError, Result};

pub type NodeId = usize;

/// User-controlled audio settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSettings {
    /// 0-100
    pub volume: u8,
    pub reverb_enabled: bool,
    pub delay_enabled: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            volume: 70,
            reverb_enabled: true,
            delay_enabled: true,
        }
    }
}

impl AudioSettings {
    pub fn master_gain(&self) -> f32 {
        self.volume.min(100) as f32 / 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Master { gain: f32 },
    ReverbSend(ReverbSend),
    DelaySend(DelaySend),
    /// Joins a dry path with a send's wet path.
    Mix,
    Chorus(ChorusStage),
    Phaser(PhaserStage),
    Analyser,
    Output,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphPlan {
    pub nodes: Vec<(NodeId, NodeKind)>,
    pub connections: Vec<(NodeId, NodeId)>,
}

impl GraphPlan {
    pub fn build(env: &SoundEnvironment, settings: &AudioSettings) -> Self {
        let mut plan = PlanBuilder::new(settings.master_gain());
        if settings.reverb_enabled {
            plan.send(NodeKind::ReverbSend(env.reverb));
        }
        if settings.delay_enabled {
            plan.send(NodeKind::DelaySend(env.delay));
        }
        if let Some(chorus) = env.chorus {
            plan.insert(NodeKind::Chorus(chorus));
        }
        if let Some(phaser) = env.phaser {
            plan.insert(NodeKind::Phaser(phaser));
        }
        plan.finish()
    }

    /// master → analyser → output
    pub fn direct(settings: &AudioSettings) -> Self {
        PlanBuilder::new(settings.master_gain()).finish()
    }

    pub fn master_gain(&self) -> f32 {
        self.nodes
            .iter()
            .find_map(|(_, kind)| match kind {
                NodeKind::Master { gain } => Some(*gain),
                _ => None,
            })
            .unwrap_or(1.0)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &NodeKind> {
        self.nodes.iter().map(|(_, kind)| kind)
    }

    /// Same nodes and connections, ignoring the master gain.
    pub fn same_routing(&self, other: &GraphPlan) -> bool {
        self.connections == other.connections
            && self.nodes.len() == other.nodes.len()
            && self.nodes.iter().zip(&other.nodes).all(|((a, ka), (b, kb))| {
                a == b
                    && (ka == kb
                        || matches!((ka, kb), (NodeKind::Master { .. }, NodeKind::Master { .. })))
            })
    }

    /// Every connection refers to a node of the plan.
    pub fn is_consistent(&self) -> bool {
        let known = |id: &NodeId| self.nodes.iter().any(|(n, _)| n == id);
        self.connections.iter().all(|(from, to)| known(from) && known(to))
    }
}

struct PlanBuilder {
    nodes: Vec<(NodeId, NodeKind)>,
    connections: Vec<(NodeId, NodeId)>,
    tail: NodeId,
}

impl PlanBuilder {
    fn new(gain: f32) -> Self {
        Self {
            nodes: vec![(0, NodeKind::Master { gain })],
            connections: Vec::new(),
            tail: 0,
        }
    }

    fn add(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push((id, kind));
        id
    }

    /// tail → [dry ∥ send] → mix
    fn send(&mut self, kind: NodeKind) {
        let send = self.add(kind);
        let mix = self.add(NodeKind::Mix);
        self.connections.push((self.tail, send));
        self.connections.push((self.tail, mix));
        self.connections.push((send, mix));
        self.tail = mix;
    }

    fn insert(&mut self, kind: NodeKind) {
        let node = self.add(kind);
        self.connections.push((self.tail, node));
        self.tail = node;
    }

    fn finish(mut self) -> GraphPlan {
        self.insert(NodeKind::Analyser);
        self.insert(NodeKind::Output);
        GraphPlan {
            nodes: self.nodes,
            connections: self.connections,
        }
    }
}

enum Stage {
    /// `out = in + wet × effect(in)`
    Send { wet: f32, effect: Box<dyn Processor> },
    Insert(Box<dyn Processor>),
}

impl Stage {
    fn process(&mut self, input: f32) -> f32 {
        match self {
            Stage::Send { wet, effect } => input + *wet * effect.process(input),
            Stage::Insert(effect) => effect.process(input),
        }
    }
}

fn compile(plan: &GraphPlan, sample_rate: f32) -> Result<Vec<Stage>> {
    if !plan.is_consistent() {
        return Err(HeartbeatError::EffectConstruction(
            "plan connects unknown nodes".to_string(),
        ));
    }
    let mut stages = Vec::new();
    for kind in plan.kinds() {
        let stage = match kind {
            NodeKind::ReverbSend(params) => Stage::Send {
                wet: params.wet,
                effect: Box::new(ConvolutionReverb::new(params, sample_rate)?),
            },
            NodeKind::DelaySend(params) => Stage::Send {
                wet: params.wet,
                effect: Box::new(FeedbackDelay::new(params, sample_rate)?),
            },
            NodeKind::Chorus(params) => Stage::Insert(Box::new(Chorus::new(params, sample_rate)?)),
            NodeKind::Phaser(params) => Stage::Insert(Box::new(Phaser::new(params, sample_rate)?)),
            NodeKind::Master { .. } | NodeKind::Mix | NodeKind::Analyser | NodeKind::Output => continue,
        };
        stages.push(stage);
    }
    Ok(stages)
}

/// The running signal graph: voices → master → effect chain → analyser.
pub struct SignalGraph {
    sample_rate: f32,
    voices: VoiceBank,
    plan: GraphPlan,
    stages: Vec<Stage>,
    master_gain: f32,
}

impl SignalGraph {
    pub fn new(sample_rate: f32, max_voices: usize) -> Self {
        let plan = GraphPlan::direct(&AudioSettings::default());
        Self {
            sample_rate,
            voices: VoiceBank::new(max_voices),
            master_gain: plan.master_gain(),
            plan,
            stages: Vec::new(),
        }
    }

    pub fn plan(&self) -> &GraphPlan {
        &self.plan
    }

    /// Installs `plan`, falling back to direct routing if any stage fails.
    /// Returns the plan actually in place.
    pub fn apply(&mut self, plan: GraphPlan) -> &GraphPlan {
        if plan == self.plan {
            return &self.plan;
        }
        if plan.same_routing(&self.plan) {
            self.master_gain = plan.master_gain();
            self.plan = plan;
            return &self.plan;
        }
        match compile(&plan, self.sample_rate) {
            Ok(stages) => {
                debug!("Routing rebuilt with {} effect stages", stages.len());
                self.master_gain = plan.master_gain();
                self.stages = stages;
                self.plan = plan;
            }
            Err(e) => {
                warn!("{}; falling back to direct routing", e);
                let direct = GraphPlan::direct(&AudioSettings {
                    volume: (plan.master_gain() * 100.0).round() as u8,
                    ..AudioSettings::default()
                });
                self.master_gain = direct.master_gain();
                self.stages.clear();
                self.plan = direct;
            }
        }
        &self.plan
    }

    pub fn start_voice(
        &mut self,
        frequency: f32,
        waveform: Waveform,
        attack: f32,
        release: f32,
        duration: f32,
        peak: f32,
    ) -> VoiceId {
        let envelope = Envelope::new(attack, release, duration, peak, self.sample_rate);
        self.voices.start(frequency, waveform, envelope)
    }

    pub fn voices(&self) -> &VoiceBank {
        &self.voices
    }

    pub fn silence_all(&mut self) {
        self.voices.silence_all();
    }

    /// Fills an interleaved buffer and feeds the analysis tap.
    pub fn render(&mut self, data: &mut [f32], channels: usize, tap: &mut AnalysisTap) {
        let channels = channels.max(1);
        for frame in data.chunks_mut(channels) {
            let mut sample = self.voices.next_sample(self.sample_rate) * self.master_gain;
            for stage in self.stages.iter_mut() {
                sample = stage.process(sample);
            }
            // Prevent clipping
            let sample = sample.clamp(-1.0, 1.0);
            tap.push(sample);
            for out in frame.iter_mut() {
                *out = sample;
            }
        }
    }
}
