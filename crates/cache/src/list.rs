/// Nó da lista: valor + vizinhos por índice no slab.
struct Node<T> {
    value: T,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Lista duplamente ligada sobre um slab (arena) de nós.
///
/// A frente é o elemento mais novo, o fundo o mais antigo. Os links são
/// índices, não ponteiros, então não existe posse cíclica. Um nó pode ficar
/// "desligado" (`unlink`) sem liberar o slot, o que permite reaproveitá-lo
/// com `link_front` depois de trocar o valor.
pub(crate) struct RecencyList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl<T> RecencyList<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Número de nós ligados.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn front(&self) -> Option<usize> {
        self.head
    }

    pub(crate) fn back(&self) -> Option<usize> {
        self.tail
    }

    /// Vizinho na direção do fundo.
    pub(crate) fn next(&self, idx: usize) -> Option<usize> {
        self.node(idx).and_then(|n| n.next)
    }

    /// Vizinho na direção da frente.
    pub(crate) fn prev(&self, idx: usize) -> Option<usize> {
        self.node(idx).and_then(|n| n.prev)
    }

    pub(crate) fn get(&self, idx: usize) -> Option<&T> {
        self.node(idx).map(|n| &n.value)
    }

    pub(crate) fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.node_mut(idx).map(|n| &mut n.value)
    }

    /// Aloca um nó novo e o liga na frente.
    pub(crate) fn push_front(&mut self, value: T) -> usize {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.link_front(idx);
        idx
    }

    /// Troca o valor de um nó (ligado ou não), devolvendo o anterior.
    pub(crate) fn replace(&mut self, idx: usize, value: T) -> Option<T> {
        self.node_mut(idx)
            .map(|n| std::mem::replace(&mut n.value, value))
    }

    /// Remove o nó da lista e libera o slot.
    pub(crate) fn remove(&mut self, idx: usize) -> Option<T> {
        self.unlink(idx);
        self.release(idx)
    }

    pub(crate) fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_front(idx);
    }

    /// Move o nó um passo em direção à frente.
    pub(crate) fn promote(&mut self, idx: usize) {
        let Some(prev) = self.prev(idx) else {
            return;
        };
        self.unlink(idx);
        self.link_before(idx, prev);
    }

    /// Desliga o nó dos vizinhos sem liberar o slot.
    pub(crate) fn unlink(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|n| (n.prev, n.next)) else {
            return;
        };
        // Nó já desligado: nada a fazer.
        if prev.is_none() && next.is_none() && self.head != Some(idx) {
            return;
        }

        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(n) = self.node_mut(idx) {
            n.prev = None;
            n.next = None;
        }
        self.len -= 1;
    }

    /// Liga um nó desligado na frente.
    pub(crate) fn link_front(&mut self, idx: usize) {
        let old_head = self.head;
        let Some(node) = self.node_mut(idx) else {
            return;
        };
        node.prev = None;
        node.next = old_head;

        match old_head {
            Some(h) => {
                if let Some(n) = self.node_mut(h) {
                    n.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
    }

    /// Libera o slot de um nó já desligado.
    pub(crate) fn release(&mut self, idx: usize) -> Option<T> {
        let node = self.slots.get_mut(idx)?.take()?;
        self.free.push(idx);
        Some(node.value)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Itera da frente para o fundo.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            current: self.head,
        }
    }

    fn link_before(&mut self, idx: usize, anchor: usize) {
        let Some(anchor_prev) = self.node(anchor).map(|n| n.prev) else {
            return;
        };
        let Some(node) = self.node_mut(idx) else {
            return;
        };
        node.prev = anchor_prev;
        node.next = Some(anchor);

        if let Some(a) = self.node_mut(anchor) {
            a.prev = Some(idx);
        }
        match anchor_prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    fn node(&self, idx: usize) -> Option<&Node<T>> {
        self.slots.get(idx)?.as_ref()
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(idx)?.as_mut()
    }
}

pub(crate) struct Iter<'a, T> {
    list: &'a RecencyList<T>,
    current: Option<usize>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.node(self.current?)?;
        self.current = node.next;
        Some(&node.value)
    }
}
