use ember_middle::ty::Type;

/// A branch target within one method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug)]
pub struct LabelInfo {
    pub name: &'static str,
    /// The instruction pointer this label is bound to
    pub ip: Option<u32>,
    /// The stack shape every edge into this label must carry
    pub shape: Option<Vec<Type>>,
    /// Positions of jump operands that wait for this label to be bound
    pending: Vec<usize>,
}

/// Stores labels and resolves the jumps to them
#[derive(Debug, Default)]
pub struct JumpContainer {
    labels: Vec<LabelInfo>,
}

impl JumpContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self, name: &'static str) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(LabelInfo {
            name,
            ip: None,
            shape: None,
            pending: Vec::new(),
        });
        label
    }

    pub fn info(&self, label: Label) -> &LabelInfo {
        &self.labels[label.0 as usize]
    }

    pub fn info_mut(&mut self, label: Label) -> &mut LabelInfo {
        &mut self.labels[label.0 as usize]
    }

    /// A label that was jumped to but never bound
    pub fn unresolved(&self) -> Option<&LabelInfo> {
        self.labels.iter().find(|l| l.ip.is_none() && !l.pending.is_empty())
    }
}

/// Binds a label to the end of the buffer and patches every pending jump to it
pub fn add_label(jc: &mut JumpContainer, label: Label, buf: &mut [u8]) {
    let ip = buf.len() as u32;
    let info = jc.info_mut(label);

    for pos in info.pending.drain(..) {
        buf[pos..pos + 4].copy_from_slice(&ip.to_le_bytes());
    }

    info.ip = Some(ip);
}

/// Appends the absolute target of `label`, or a placeholder that is patched once the label is bound
pub fn add_jump(jc: &mut JumpContainer, label: Label, buf: &mut Vec<u8>) {
    let info = jc.info_mut(label);

    match info.ip {
        Some(ip) => buf.extend_from_slice(&ip.to_le_bytes()),
        None => {
            info.pending.push(buf.len());
            buf.extend_from_slice(&[0; 4]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_jumps_are_patched() {
        let mut jc = JumpContainer::new();
        let mut buf = vec![0xaa];
        let label = jc.new_label("end");

        add_jump(&mut jc, label, &mut buf);
        assert!(jc.unresolved().is_some());
        buf.push(0xbb);
        add_label(&mut jc, label, &mut buf);

        assert_eq!(&buf[1..5], &6u32.to_le_bytes());
        assert!(jc.unresolved().is_none());
    }

    #[test]
    fn backward_jumps_use_bound_ip() {
        let mut jc = JumpContainer::new();
        let mut buf = vec![0; 3];
        let label = jc.new_label("loop");
        add_label(&mut jc, label, &mut buf);
        add_jump(&mut jc, label, &mut buf);
        assert_eq!(&buf[3..7], &3u32.to_le_bytes());
    }
}
